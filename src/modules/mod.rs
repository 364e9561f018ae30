pub mod system;
pub mod unverify;
pub mod voice;
