mod test_random;
pub mod utils;
