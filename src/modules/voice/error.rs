use crate::database::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid bitrate for this server, it has to be above 64000 and at most {limit}.")]
    InvalidBitrate { limit: u32 },
    #[error("This command only works in the chat of a managed voice channel.")]
    NotManaged,
    #[error("Channel is already locked.")]
    AlreadyLocked,
    #[error("Channel is already unlocked.")]
    AlreadyUnlocked,
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}
