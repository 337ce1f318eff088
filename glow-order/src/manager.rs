use crate::models::{Order, OrderStatus, PaymentStatus};

/// Outcome of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The order was already in the requested state
    Unchanged,
}

/// Enforces the order lifecycle: Draft → Pending → {Completed | Failed | Cancelled},
/// and Completed → Refunded.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Transition: Draft → Pending (order persisted, awaiting payment)
    pub fn submit(order: &mut Order) -> Result<Transition, OrderError> {
        match order.status {
            OrderStatus::Draft => {
                order.update_status(OrderStatus::Pending);
                Ok(Transition::Applied)
            }
            OrderStatus::Pending => Ok(Transition::Unchanged),
            from => Err(invalid(from, OrderStatus::Pending)),
        }
    }

    /// Transition: Pending → Completed (payment confirmed)
    pub fn complete(order: &mut Order) -> Result<Transition, OrderError> {
        match order.status {
            OrderStatus::Pending => {
                order.payment.status = PaymentStatus::Completed;
                order.update_status(OrderStatus::Completed);
                Ok(Transition::Applied)
            }
            OrderStatus::Completed => Ok(Transition::Unchanged),
            from => Err(invalid(from, OrderStatus::Completed)),
        }
    }

    /// Transition: Pending → Failed (payment declined, gateway down, or timed out)
    pub fn fail(order: &mut Order) -> Result<Transition, OrderError> {
        match order.status {
            OrderStatus::Pending => {
                order.payment.status = PaymentStatus::Failed;
                order.update_status(OrderStatus::Failed);
                Ok(Transition::Applied)
            }
            OrderStatus::Failed => Ok(Transition::Unchanged),
            from => Err(invalid(from, OrderStatus::Failed)),
        }
    }

    /// Transition: Draft/Pending → Cancelled
    pub fn cancel(order: &mut Order) -> Result<Transition, OrderError> {
        match order.status {
            OrderStatus::Draft | OrderStatus::Pending => {
                if order.payment.status == PaymentStatus::Pending {
                    order.payment.status = PaymentStatus::Failed;
                }
                order.update_status(OrderStatus::Cancelled);
                Ok(Transition::Applied)
            }
            OrderStatus::Cancelled => Ok(Transition::Unchanged),
            from => Err(invalid(from, OrderStatus::Cancelled)),
        }
    }

    /// Transition: Completed → Refunded
    pub fn refund(order: &mut Order) -> Result<Transition, OrderError> {
        match order.status {
            OrderStatus::Completed => {
                order.update_status(OrderStatus::Refunded);
                Ok(Transition::Applied)
            }
            OrderStatus::Refunded => Ok(Transition::Unchanged),
            from => Err(invalid(from, OrderStatus::Refunded)),
        }
    }
}

fn invalid(from: OrderStatus, to: OrderStatus) -> OrderError {
    OrderError::InvalidTransition {
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}
