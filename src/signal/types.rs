//! Signal types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Digit contract families traded by the strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractType {
    #[serde(rename = "DIGITEVEN")]
    DigitEven,
    #[serde(rename = "DIGITODD")]
    DigitOdd,
    /// Wins when the settlement digit is above the barrier
    #[serde(rename = "DIGITOVER")]
    DigitOver,
    /// Wins when the settlement digit is below the barrier
    #[serde(rename = "DIGITUNDER")]
    DigitUnder,
    /// Wins when the settlement digit differs from the barrier
    #[serde(rename = "DIGITDIFF")]
    DigitDiff,
}

impl ContractType {
    /// Venue code
    pub fn code(self) -> &'static str {
        match self {
            ContractType::DigitEven => "DIGITEVEN",
            ContractType::DigitOdd => "DIGITODD",
            ContractType::DigitOver => "DIGITOVER",
            ContractType::DigitUnder => "DIGITUNDER",
            ContractType::DigitDiff => "DIGITDIFF",
        }
    }

    pub fn needs_barrier(self) -> bool {
        matches!(
            self,
            ContractType::DigitOver | ContractType::DigitUnder | ContractType::DigitDiff
        )
    }

    /// Whether `digit` settles this contract as a win
    pub fn wins(self, digit: u8, barrier: Option<u8>) -> bool {
        let barrier = barrier.unwrap_or(0);
        match self {
            ContractType::DigitEven => digit % 2 == 0,
            ContractType::DigitOdd => digit % 2 == 1,
            ContractType::DigitOver => digit > barrier,
            ContractType::DigitUnder => digit < barrier,
            ContractType::DigitDiff => digit != barrier,
        }
    }

    /// How many of the ten digits win
    pub fn winning_digits(self, barrier: Option<u8>) -> usize {
        (0..10u8).filter(|d| self.wins(*d, barrier)).count()
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ContractType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DIGITEVEN" => Ok(ContractType::DigitEven),
            "DIGITODD" => Ok(ContractType::DigitOdd),
            "DIGITOVER" => Ok(ContractType::DigitOver),
            "DIGITUNDER" => Ok(ContractType::DigitUnder),
            "DIGITDIFF" => Ok(ContractType::DigitDiff),
            other => Err(format!("unknown contract type '{other}'")),
        }
    }
}

/// What the strategy wants the loop to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Place the contract now
    Enter,
    /// A setup is forming
    Wait,
    /// Nothing to act on
    None,
}

/// Strength band of the dominant share
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Below,
    Building,
    Ready,
    Strong,
}

/// Strategy identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    #[default]
    EvenOdd,
    EvenOddAdvanced,
    OverUnder,
    OverUnderAdvanced,
    Differs,
    DiffersAdvanced,
}

impl StrategyId {
    pub const ALL: [StrategyId; 6] = [
        StrategyId::EvenOdd,
        StrategyId::EvenOddAdvanced,
        StrategyId::OverUnder,
        StrategyId::OverUnderAdvanced,
        StrategyId::Differs,
        StrategyId::DiffersAdvanced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyId::EvenOdd => "even_odd",
            StrategyId::EvenOddAdvanced => "even_odd_advanced",
            StrategyId::OverUnder => "over_under",
            StrategyId::OverUnderAdvanced => "over_under_advanced",
            StrategyId::Differs => "differs",
            StrategyId::DiffersAdvanced => "differs_advanced",
        }
    }

    pub fn is_advanced(self) -> bool {
        matches!(
            self,
            StrategyId::EvenOddAdvanced | StrategyId::OverUnderAdvanced | StrategyId::DiffersAdvanced
        )
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        StrategyId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}

/// One strategy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy: StrategyId,
    pub decision: Decision,
    pub contract_type: Option<ContractType>,
    /// Barrier or predicted digit for digit contracts
    pub barrier: Option<u8>,
    /// Heuristic percentage, not a calibrated probability
    pub confidence: Decimal,
    pub tier: Tier,
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(strategy: StrategyId, decision: Decision, tier: Tier) -> Self {
        Self {
            strategy,
            decision,
            contract_type: None,
            barrier: None,
            confidence: Decimal::ZERO,
            tier,
            note: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// No action, with the reason
    pub fn none(strategy: StrategyId, note: impl Into<String>) -> Self {
        Self::new(strategy, Decision::None, Tier::Below).with_note(note)
    }

    pub fn with_contract(mut self, contract_type: ContractType, barrier: Option<u8>) -> Self {
        self.contract_type = Some(contract_type);
        self.barrier = barrier;
        self
    }

    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn is_enter(&self) -> bool {
        self.decision == Decision::Enter && self.contract_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_wins() {
        assert!(ContractType::DigitEven.wins(4, None));
        assert!(!ContractType::DigitOdd.wins(4, None));
        assert!(ContractType::DigitOver.wins(5, Some(4)));
        assert!(!ContractType::DigitOver.wins(4, Some(4)));
        assert!(ContractType::DigitUnder.wins(4, Some(5)));
        assert!(!ContractType::DigitDiff.wins(7, Some(7)));
        assert_eq!(ContractType::DigitDiff.winning_digits(Some(3)), 9);
        assert_eq!(ContractType::DigitOver.winning_digits(Some(4)), 5);
    }

    #[test]
    fn test_contract_type_codes() {
        assert_eq!(ContractType::DigitUnder.to_string(), "DIGITUNDER");
        assert_eq!("digitdiff".parse::<ContractType>(), Ok(ContractType::DigitDiff));
        assert_eq!(
            serde_json::to_value(ContractType::DigitOdd).unwrap(),
            serde_json::json!("DIGITODD")
        );
    }

    #[test]
    fn test_strategy_id_parse() {
        assert_eq!("over-under".parse::<StrategyId>(), Ok(StrategyId::OverUnder));
        assert_eq!(
            "DIFFERS_ADVANCED".parse::<StrategyId>(),
            Ok(StrategyId::DiffersAdvanced)
        );
        assert!("martingale".parse::<StrategyId>().is_err());
        assert!(StrategyId::EvenOddAdvanced.is_advanced());
    }
}
