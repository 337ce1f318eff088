pub mod error;
pub mod events;
pub mod finalizer;
pub mod ledger;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod sale;

pub use error::{CheckoutError, ErrorKind};
pub use events::{LoggingEventSink, OrderEventSink};
pub use finalizer::{
    CheckoutLine, CheckoutOutcome, CheckoutRequest, CheckoutRules, ConfirmOutcome, CustomerSummary, OrderFinalizer,
    PaymentUpdate, QuoteRequest, RefundOutcome, SweepReport,
};
pub use ledger::{Direction, EntryCategory, EntryStatus, LedgerEntry, LedgerError};
pub use manager::{OrderError, OrderStateMachine, Transition};
pub use models::{
    CouponRef, Order, OrderItem, OrderPricing, OrderStatus, PaymentMethod, PaymentStatus, SalesChannel, ShippingAddress,
};
pub use orchestrator::{CircuitBreaker, CircuitState, PaymentOrchestrator};
pub use repository::{CheckoutStore, CheckoutTx, StoreError, StoreResult};
pub use sale::{PendingSale, PendingSaleStore, PendingSaleTicket, SaleError, SaleService, StartSaleRequest};
