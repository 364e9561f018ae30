use crate::database::DbError;
use thiserror::Error;

/// Reasons a restriction command is refused. Nothing has been changed on the
/// platform when one of these is returned before `Db`.
#[derive(Error, Debug)]
pub enum UnverifyError {
    #[error("Unverify is not configured on this server, set a role with `unverify set` first.")]
    NotConfigured,
    #[error("Member is already unverified.")]
    AlreadyUnverified,
    #[error("End time already passed.")]
    EndTimePassed,
    #[error("Is this member really unverified?")]
    NotUnverified,
    #[error("Member could not be found.")]
    MemberNotFound,
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}
