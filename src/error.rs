/// The bulletin lacks its student or semester block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Données du bulletin incomplètes")]
pub struct IncompleteBulletin;

/// Failures while talking to a bulletin source (REST backend or database).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("not found: {resource}")]
    NotFound {
        resource: String,
        matricule: Option<String>,
    },

    #[error("access forbidden: {0}")]
    Forbidden(String),

    /// No HTTP status was received (connection refused, DNS, timeout).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend error ({status}): {body}")]
    Backend { status: u16, body: String },

    #[error("invalid payload: {0}")]
    Decode(String),

    #[error("invalid request path: {0}")]
    InvalidPath(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl FetchError {
    pub fn from_status(status: u16, body: String, resource: &str, matricule: Option<&str>) -> Self {
        match status {
            404 => Self::NotFound {
                resource: resource.to_string(),
                matricule: matricule.map(str::to_string),
            },
            403 => Self::Forbidden(resource.to_string()),
            0 => Self::Unreachable(body),
            _ => Self::Backend { status, body },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Forbidden(_) => Some(403),
            Self::Unreachable(_) => Some(0),
            Self::Backend { status, .. } => Some(*status),
            Self::Decode(_) | Self::InvalidPath(_) | Self::Database(_) => None,
        }
    }

    /// Message shown to the registrar operator.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound {
                matricule: Some(matricule),
                ..
            } => format!(
                "Aucun relevé trouvé pour le matricule {matricule} et le semestre sélectionné."
            ),
            Self::NotFound { .. } => "Ressource introuvable.".to_string(),
            Self::Forbidden(_) => {
                "Accès refusé : vous n'avez pas les droits nécessaires.".to_string()
            }
            Self::Unreachable(_) => {
                "Impossible de contacter le serveur. Vérifiez votre connexion.".to_string()
            }
            _ => "Erreur lors de la récupération des données. Veuillez réessayer.".to_string(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Backend {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("PDF serialization failed: {0}")]
    Serialize(String),

    #[error("logo could not be read: {0}")]
    LogoIo(#[from] std::io::Error),

    #[error("logo could not be decoded: {0}")]
    LogoDecode(#[from] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("fetching bulletin for {matricule} failed: {source}")]
    Fetch {
        matricule: String,
        #[source]
        source: FetchError,
    },

    #[error("bulletin for {matricule} is incomplete")]
    Incomplete { matricule: String },

    #[error("rendering transcript for {matricule} failed: {source}")]
    Render {
        matricule: String,
        #[source]
        source: RenderError,
    },

    #[error("student {matricule} has no e-mail address")]
    MissingEmail { matricule: String },

    #[error("loading roster failed: {0}")]
    Roster(#[source] FetchError),

    #[error("no student selected")]
    NoStudents,

    /// Every selected student failed. Input order is kept.
    #[error("all {} selected students failed", .0.len())]
    AllFailed(Vec<BatchError>),

    #[error("building archive failed: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("e-mail dispatch failed: {0}")]
    Dispatch(#[source] FetchError),

    #[error("batch cancelled")]
    Cancelled,
}

impl BatchError {
    pub fn matricule(&self) -> Option<&str> {
        match self {
            Self::Fetch { matricule, .. }
            | Self::Incomplete { matricule }
            | Self::Render { matricule, .. }
            | Self::MissingEmail { matricule } => Some(matricule.as_str()),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Fetch { source, .. } => source.user_message(),
            Self::Incomplete { .. } => IncompleteBulletin.to_string(),
            Self::Render { .. } => "Erreur lors de la génération du PDF.".to_string(),
            Self::MissingEmail { matricule } => {
                format!("Aucune adresse e-mail pour l'étudiant {matricule}.")
            }
            Self::Roster(_) => "Impossible de récupérer les étudiants pour cette promotion et ce département.".to_string(),
            Self::NoStudents => "Aucun étudiant trouvé pour les critères sélectionnés.".to_string(),
            Self::AllFailed(failures) => match failures.first() {
                Some(first) => first.user_message(),
                None => Self::NoStudents.user_message(),
            },
            Self::Archive(_) => "Erreur lors de la génération de certains bulletins.".to_string(),
            Self::Dispatch(_) => "Erreur lors de l'envoi des emails.".to_string(),
            Self::Cancelled => "Génération annulée.".to_string(),
        }
    }
}

/// Failures while building a study plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unknown semester id {0}")]
    UnknownSemester(i64),

    #[error("unrecognized semester label: {0}")]
    UnrecognizedLabel(String),
}

impl PlanError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Fetch(err) => err.user_message(),
            Self::UnknownSemester(id) => format!("Semestre non trouvé avec l'ID: {id}"),
            Self::UnrecognizedLabel(label) => format!("Format de semestre non reconnu: {label}"),
        }
    }
}
