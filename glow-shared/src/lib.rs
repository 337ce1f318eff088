pub mod models;
pub mod pii;

pub use pii::{mask_phone, Masked};
