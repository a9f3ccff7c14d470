//! Shared Domain Types

mod answer;
mod ids;
mod leaderboard;
mod participant;
mod question;
mod session;

pub use answer::*;
pub use ids::*;
pub use leaderboard::*;
pub use participant::*;
pub use question::*;
pub use session::*;
