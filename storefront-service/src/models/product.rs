use common_money::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry. Prices are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub description: String,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            price,
            description: String::new(),
        }
    }
}
