pub mod backends;
pub mod dedup;
pub mod extract;
pub mod history;
pub mod matching;
pub mod prompt;
pub mod rename;
pub mod variants;

pub use backends::*;
pub use dedup::*;
pub use extract::*;
pub use history::*;
pub use matching::*;
pub use prompt::*;
pub use rename::*;
pub use variants::*;
