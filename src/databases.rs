use crate::config::Config;
use crate::database::{Database, DbError};
use crate::modules::{unverify::database::UnverifyDatabase, voice::database::VoiceDatabase};

#[derive(Debug)]
pub struct Databases {
    pub unverify: Database<UnverifyDatabase>,
    pub voice: Database<VoiceDatabase>,
}

impl Databases {
    pub async fn open(config: &Config) -> Result<Self, DbError> {
        Ok(Self {
            unverify: Database::new(config.database_path("unverify")).await?,
            voice: Database::new(config.database_path("voice")).await?,
        })
    }
}
