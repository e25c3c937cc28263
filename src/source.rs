//! Seams between the transcript pipeline and the outside world.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{Bulletin, Departement, EmailPayload, Etudiant, Semestre};

/// Where bulletins and reference data come from: the scolarité REST backend
/// ([`crate::client::ApiClient`]) or the local store ([`crate::db::PgBulletinSource`]).
#[async_trait]
pub trait BulletinSource: Send + Sync {
    async fn bulletin(&self, matricule: &str, semestre_id: i64) -> Result<Bulletin, FetchError>;

    /// Students of one department and cohort, as listed for a semester.
    async fn roster(
        &self,
        departement_id: i64,
        promotion: &str,
        semestre_id: i64,
    ) -> Result<Vec<Etudiant>, FetchError>;

    async fn semestres(&self) -> Result<Vec<Semestre>, FetchError>;

    async fn departements(&self) -> Result<Vec<Departement>, FetchError>;
}

/// Hands rendered transcripts over for e-mail delivery.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn send_transcripts(&self, payloads: &[EmailPayload]) -> Result<(), FetchError>;
}
