pub mod coupon;
pub mod pricing;
pub mod product;
pub mod shipping;

pub use coupon::{find_eligible, Coupon, CouponHolder, CouponKind, CouponScope, IneligibleReason};
pub use pricing::{CartLine, PricingConfig, PricingEngine, PricingError, PricingRequest, PricingResult, Rates};
pub use product::{Product, ProductCategory};
pub use shipping::{ShippingConfig, ShippingMethod};
