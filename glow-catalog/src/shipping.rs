use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingMethod {
    pub id: String,
    /// Flat charge in minor units
    pub flat_charge: i64,
    pub eta_label: String,
}

/// Static shipping configuration injected into the pricing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingConfig {
    pub free_shipping_threshold: i64,
    pub methods: Vec<ShippingMethod>,
}

impl ShippingConfig {
    pub fn method(&self, id: &str) -> Option<&ShippingMethod> {
        self.methods.iter().find(|m| m.id == id)
    }

    /// Charge for `method_id` at the given subtotal, `None` if the method is unknown.
    pub fn charge_for(&self, method_id: &str, subtotal: i64) -> Option<i64> {
        let method = self.method(method_id)?;
        if subtotal >= self.free_shipping_threshold {
            Some(0)
        } else {
            Some(method.flat_charge)
        }
    }
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: 49900,
            methods: vec![
                ShippingMethod {
                    id: "standard".to_string(),
                    flat_charge: 4900,
                    eta_label: "3-5 business days".to_string(),
                },
                ShippingMethod {
                    id: "express".to_string(),
                    flat_charge: 9900,
                    eta_label: "1-2 business days".to_string(),
                },
                ShippingMethod {
                    id: "in_store".to_string(),
                    flat_charge: 0,
                    eta_label: "Collected at counter".to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ShippingConfig {
        ShippingConfig {
            free_shipping_threshold: 500,
            methods: vec![ShippingMethod {
                id: "standard".to_string(),
                flat_charge: 50,
                eta_label: "3-5 days".to_string(),
            }],
        }
    }

    #[test]
    fn test_flat_charge_below_threshold() {
        assert_eq!(config().charge_for("standard", 400), Some(50));
    }

    #[test]
    fn test_free_at_threshold() {
        assert_eq!(config().charge_for("standard", 500), Some(0));
        assert_eq!(config().charge_for("standard", 600), Some(0));
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(config().charge_for("drone", 400), None);
    }
}
