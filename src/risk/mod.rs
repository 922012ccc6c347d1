//! C6 Risk Controller (§4.6). Owns the live RiskSnapshot exclusively;
//! everyone else reads an immutable copy.

mod controller;
mod var;

pub use controller::{RiskController, TradeApproval};
pub use var::VarCvarCalculator;
