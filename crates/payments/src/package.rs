use serde::Serialize;

/// A purchasable bundle of credit-minutes. Static reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub credits: i64,
    /// Minor currency units.
    pub price_cents: i64,
    pub currency: &'static str,
    pub popular: bool,
    /// Percent saved against the smallest package.
    pub discount: u8,
}

impl CreditPackage {
    /// Price as a decimal amount, the unit checkout providers expect.
    pub fn unit_price(&self) -> f64 {
        self.price_cents as f64 / 100.0
    }
}

const PACKAGES: [CreditPackage; 4] = [
    CreditPackage {
        id: "basic",
        name: "Basic",
        description: "Perfect to get started",
        credits: 120,
        price_cents: 500,
        currency: "USD",
        popular: false,
        discount: 0,
    },
    CreditPackage {
        id: "standard",
        name: "Standard",
        description: "Ideal for regular use",
        credits: 300,
        price_cents: 1_000,
        currency: "USD",
        popular: true,
        discount: 17,
    },
    CreditPackage {
        id: "premium",
        name: "Premium",
        description: "For frequent users",
        credits: 600,
        price_cents: 1_800,
        currency: "USD",
        popular: false,
        discount: 25,
    },
    CreditPackage {
        id: "max",
        name: "Max",
        description: "Maximum capacity",
        credits: 1_500,
        price_cents: 4_000,
        currency: "USD",
        popular: false,
        discount: 33,
    },
];

pub fn catalog() -> &'static [CreditPackage] {
    &PACKAGES
}

pub fn find_package(id: &str) -> Option<&'static CreditPackage> {
    PACKAGES.iter().find(|p| p.id == id)
}
