use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storefront product categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductCategory {
    Cleanser,
    Toner,
    Serum,
    Moisturizer,
    Sunscreen,
    Mask,
    Kit,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCategory::Cleanser => "CLEANSER",
            ProductCategory::Toner => "TONER",
            ProductCategory::Serum => "SERUM",
            ProductCategory::Moisturizer => "MOISTURIZER",
            ProductCategory::Sunscreen => "SUNSCREEN",
            ProductCategory::Mask => "MASK",
            ProductCategory::Kit => "KIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CLEANSER" => Some(ProductCategory::Cleanser),
            "TONER" => Some(ProductCategory::Toner),
            "SERUM" => Some(ProductCategory::Serum),
            "MOISTURIZER" => Some(ProductCategory::Moisturizer),
            "SUNSCREEN" => Some(ProductCategory::Sunscreen),
            "MASK" => Some(ProductCategory::Mask),
            "KIT" => Some(ProductCategory::Kit),
            _ => None,
        }
    }
}

/// Catalog-service view of a product: what pricing and stock checks read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub category: ProductCategory,
    /// Current unit price in minor units
    pub price: i64,
    pub stock: i64,
    pub is_active: bool,
}

impl Product {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, category: ProductCategory, price: i64, stock: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            sku: sku.into(),
            name: name.into(),
            category,
            price,
            stock,
            is_active: true,
        }
    }

    /// Sellable right now in the requested quantity?
    pub fn can_fulfil(&self, quantity: u32) -> bool {
        self.is_active && self.stock >= i64::from(quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_fulfil() {
        let mut product = Product::new("SRM-001", "Niacinamide Serum", ProductCategory::Serum, 79900, 2);
        assert!(product.can_fulfil(2));
        assert!(!product.can_fulfil(3));

        product.is_active = false;
        assert!(!product.can_fulfil(1));
    }

    #[test]
    fn test_category_round_trip() {
        for category in [ProductCategory::Cleanser, ProductCategory::Sunscreen, ProductCategory::Kit] {
            assert_eq!(ProductCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(ProductCategory::parse("LIPSTICK"), None);
    }
}
