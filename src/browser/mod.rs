pub mod headless;

pub use headless::{ChromeSession, ChromeSessionFactory};
