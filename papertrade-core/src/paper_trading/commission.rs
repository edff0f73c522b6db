//! Commission model
//!
//! Cost of a fill = flat fee (once per order) + notional-based charges + charges
//! levied on the fees themselves (e.g. a service tax on brokerage).

use serde::{Deserialize, Serialize};

use super::sampler::round_to;
use crate::error::ConfigError;
use crate::market::Side;

/// Which sides a charge applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeSide {
    Both,
    BuyOnly,
    SellOnly,
}

impl ChargeSide {
    fn applies_to(&self, side: Side) -> bool {
        match self {
            ChargeSide::Both => true,
            ChargeSide::BuyOnly => side == Side::Buy,
            ChargeSide::SellOnly => side == Side::Sell,
        }
    }
}

/// What a percentage charge is levied on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeBasis {
    /// price × quantity
    Notional,
    /// flat fee plus every taxable notional charge
    Fees,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PercentageComponent {
    pub name: String,
    /// Fraction, e.g. 0.00025 for 0.025%
    pub rate: f64,
    pub side: ChargeSide,
    pub basis: ChargeBasis,
    /// Included in the base of `Fees` charges
    #[serde(default)]
    pub taxable: bool,
}

impl PercentageComponent {
    pub fn notional(name: impl Into<String>, rate: f64, side: ChargeSide) -> Self {
        Self {
            name: name.into(),
            rate,
            side,
            basis: ChargeBasis::Notional,
            taxable: false,
        }
    }

    pub fn on_fees(name: impl Into<String>, rate: f64) -> Self {
        Self {
            name: name.into(),
            rate,
            side: ChargeSide::Both,
            basis: ChargeBasis::Fees,
            taxable: false,
        }
    }

    pub fn taxable(mut self) -> Self {
        self.taxable = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionConfig {
    pub flat_fee: f64,
    pub percentage_components: Vec<PercentageComponent>,
    pub decimals: Option<u32>,
}

impl Default for CommissionConfig {
    /// Equity brokerage schedule: flat 20 per order, 0.025% securities tax on
    /// sells, 0.00325% exchange charges, 18% tax on brokerage and exchange charges.
    fn default() -> Self {
        Self {
            flat_fee: 20.0,
            percentage_components: vec![
                PercentageComponent::notional("securities_transaction_tax", 0.00025, ChargeSide::SellOnly),
                PercentageComponent::notional("exchange_transaction_charge", 0.0000325, ChargeSide::Both)
                    .taxable(),
                PercentageComponent::on_fees("tax_on_fees", 0.18),
            ],
            decimals: Some(2),
        }
    }
}

impl CommissionConfig {
    /// Flat fee only, no percentage components.
    pub fn flat(fee: f64) -> Self {
        Self {
            flat_fee: fee,
            percentage_components: Vec::new(),
            decimals: Some(2),
        }
    }

    pub fn zero() -> Self {
        Self::flat(0.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.flat_fee >= 0.0 && self.flat_fee.is_finite()) {
            return Err(ConfigError::invalid("commission.flat_fee", "must be >= 0"));
        }
        if let Some(component) = self
            .percentage_components
            .iter()
            .find(|c| !(c.rate >= 0.0 && c.rate.is_finite()))
        {
            return Err(ConfigError::invalid(
                "commission.percentage_components",
                format!("rate of {} must be >= 0", component.name),
            ));
        }
        Ok(())
    }
}

/// Commission calculator
#[derive(Clone, Debug)]
pub struct CommissionModel {
    config: CommissionConfig,
}

impl CommissionModel {
    pub fn new(config: CommissionConfig) -> Self {
        Self { config }
    }

    /// Commission for one fill. `include_flat_fee` is false for the second and
    /// later slices of a partially filled order.
    pub fn calculate(&self, side: Side, price: f64, quantity: f64, include_flat_fee: bool) -> f64 {
        let notional = price * quantity;
        let flat = if include_flat_fee { self.config.flat_fee } else { 0.0 };

        let mut notional_charges = 0.0;
        let mut taxable_base = flat;
        for component in self
            .config
            .percentage_components
            .iter()
            .filter(|c| c.basis == ChargeBasis::Notional && c.side.applies_to(side))
        {
            let charge = notional * component.rate;
            notional_charges += charge;
            if component.taxable {
                taxable_base += charge;
            }
        }

        let fee_charges: f64 = self
            .config
            .percentage_components
            .iter()
            .filter(|c| c.basis == ChargeBasis::Fees && c.side.applies_to(side))
            .map(|c| taxable_base * c.rate)
            .sum();

        let total = flat + notional_charges + fee_charges;
        match self.config.decimals {
            Some(decimals) => round_to(total, decimals),
            None => total,
        }
    }

    pub fn config(&self) -> &CommissionConfig {
        &self.config
    }
}
