mod schema;
mod utils;

pub use schema::*;
pub use utils::*;
