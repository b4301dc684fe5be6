pub mod parser;
pub mod types;

pub use parser::{parse, parse_implementer, parse_reviewer};
pub use types::{ImplementerOutcome, Outcome, ReviewerOutcome};
