use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Bucket for grade entries whose module carries no teaching-unit code.
pub const UNDEFINED_UNIT: &str = "UE Non définie";

/// Per-student, per-semester payload served by the scolarité backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bulletin {
    pub etudiant: Option<Etudiant>,
    pub semestre: Option<Semestre>,
    #[serde(default)]
    pub notes: Vec<NoteEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Etudiant {
    #[serde(alias = "code")]
    pub matricule: Option<String>,
    pub nom: Option<String>,
    pub prenom: Option<String>,
    pub email: Option<String>,
    pub promotion: Option<String>,
    pub departement: Option<Departement>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Departement {
    pub id_departement: Option<i64>,
    pub code_dep: Option<String>,
    pub intitule: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Semestre {
    pub id_semestre: Option<i64>,
    pub semestre: Option<String>,
    pub annee: Option<i32>,
}

/// Raw grade entry as sent by the backend. Every number may be absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEntry {
    pub note_devoir: Option<f64>,
    pub note_examen: Option<f64>,
    pub note_rattrapage: Option<f64>,
    pub note_generale: Option<f64>,
    pub element_module: Option<ElementModule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementModule {
    #[serde(rename = "codeEM")]
    pub code_em: Option<String>,
    #[serde(rename = "codeEU")]
    pub code_eu: Option<String>,
    pub intitule: Option<String>,
    pub nombre_credits: Option<f64>,
}

/// One grade of one student in one module element.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub module_code: String,
    pub module_title: Option<String>,
    pub unit_code: Option<String>,
    pub credits: f64,
    pub devoir: f64,
    pub examen: f64,
    pub rattrapage: Option<f64>,
    pub overall: f64,
}

/// Records sharing one teaching-unit code, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitGroup {
    pub code: String,
    pub records: Vec<GradeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValidationStatus {
    /// Own score reached 10.
    Direct,
    /// Compensated by the teaching-unit average.
    InternalCompensation,
    /// Compensated by the semester average.
    ExternalCompensation,
    NotValidated,
}

impl ValidationStatus {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Direct => "V",
            Self::InternalCompensation => "VCI",
            Self::ExternalCompensation => "VCE",
            Self::NotValidated => "NV",
        }
    }

    pub fn is_validated(self) -> bool {
        !matches!(self, Self::NotValidated)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub record: GradeRecord,
    pub status: ValidationStatus,
}

impl ValidatedRecord {
    pub fn validated(&self) -> bool {
        self.status.is_validated()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUnit {
    pub code: String,
    pub average: f64,
    pub records: Vec<ValidatedRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentIdentity {
    pub matricule: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub speciality: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemesterIdentity {
    pub label: Option<String>,
    pub academic_year: Option<String>,
}

/// Everything the renderer needs for one student and one semester.
///
/// Built once by [`crate::validation::build_transcript`] and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptDocument {
    pub student: StudentIdentity,
    pub semester: SemesterIdentity,
    pub units: Vec<ValidatedUnit>,
    pub credits_total: f64,
    pub credits_validated: f64,
    pub semester_validated: bool,
    pub average: Option<f64>,
    pub signed_on: Option<NaiveDate>,
}

/// Body item of the backend's bulk e-mail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    pub email: String,
    pub pdf_base64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulletin_payload_decodes_backend_field_names() {
        let payload = serde_json::json!({
            "etudiant": {
                "matricule": "C19042",
                "nom": "Sidi",
                "prenom": "Ahmed",
                "email": "c19042@esp.mr",
                "departement": { "idDepartement": 2, "codeDep": "GI", "intitule": "Génie Informatique" }
            },
            "semestre": { "idSemestre": 5, "semestre": "S3", "annee": 2024 },
            "notes": [{
                "noteDevoir": 12.0,
                "noteExamen": 14.0,
                "noteRattrapage": 0.0,
                "noteGenerale": 13.2,
                "elementModule": { "codeEM": "HE31", "codeEU": "UE01", "intitule": "Anglais", "nombreCredits": 3.0 }
            }]
        });

        let bulletin: Bulletin = serde_json::from_value(payload).unwrap();
        let etudiant = bulletin.etudiant.unwrap();
        assert_eq!(etudiant.matricule.as_deref(), Some("C19042"));
        assert_eq!(
            etudiant.departement.unwrap().intitule.as_deref(),
            Some("Génie Informatique")
        );
        let module = bulletin.notes[0].element_module.as_ref().unwrap();
        assert_eq!(module.code_em.as_deref(), Some("HE31"));
        assert_eq!(module.code_eu.as_deref(), Some("UE01"));
        assert_eq!(module.nombre_credits, Some(3.0));
    }

    #[test]
    fn roster_entries_accept_code_as_matricule() {
        let etudiant: Etudiant = serde_json::from_str(r#"{"code":"C20001","nom":"Ba"}"#).unwrap();
        assert_eq!(etudiant.matricule.as_deref(), Some("C20001"));
    }

    #[test]
    fn status_tags_match_registrar_codes() {
        assert_eq!(ValidationStatus::Direct.tag(), "V");
        assert_eq!(ValidationStatus::InternalCompensation.tag(), "VCI");
        assert_eq!(ValidationStatus::ExternalCompensation.tag(), "VCE");
        assert_eq!(ValidationStatus::NotValidated.tag(), "NV");
        assert!(!ValidationStatus::NotValidated.is_validated());
    }

    #[test]
    fn email_payload_uses_camel_case() {
        let payload = EmailPayload {
            email: "a@esp.mr".to_string(),
            pdf_base64: "JVBERi0=".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["pdfBase64"], "JVBERi0=");
    }
}
