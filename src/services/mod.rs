pub mod claimer;
pub mod downstream;
pub mod driver;
pub mod finalizer;
pub mod mock_provider;
pub mod provider;
pub mod recovery;
pub mod resolver;
