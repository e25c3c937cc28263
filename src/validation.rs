use chrono::NaiveDate;

use crate::error::IncompleteBulletin;
use crate::grades::{self, weighted_average};
use crate::models::{
    Bulletin, Etudiant, SemesterIdentity, StudentIdentity, TranscriptDocument, UnitGroup,
    ValidatedRecord, ValidatedUnit, ValidationStatus,
};

pub const PASS_MARK: f64 = 10.0;
pub const INTERNAL_FLOOR: f64 = 6.0;
pub const EXTERNAL_UNIT_FLOOR: f64 = 8.0;

/// Evaluates all four validation conditions. A record passes when any holds;
/// the tag names the strongest one.
pub fn classify(own: f64, unit_average: f64, semester_average: f64) -> ValidationStatus {
    let direct = own >= PASS_MARK;
    let unit_passed = unit_average >= PASS_MARK;
    let internal = own >= INTERNAL_FLOOR && unit_average >= PASS_MARK;
    let external = unit_average >= EXTERNAL_UNIT_FLOOR && semester_average >= PASS_MARK;

    if direct {
        ValidationStatus::Direct
    } else if unit_passed || internal {
        ValidationStatus::InternalCompensation
    } else if external {
        ValidationStatus::ExternalCompensation
    } else {
        ValidationStatus::NotValidated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub units: Vec<ValidatedUnit>,
    pub credits_total: f64,
    pub credits_validated: f64,
    pub semester_validated: bool,
    pub average: f64,
}

pub fn evaluate(groups: Vec<UnitGroup>) -> Evaluation {
    let average = weighted_average(groups.iter().flat_map(|group| group.records.iter()));
    let credits_total: f64 = groups
        .iter()
        .flat_map(|group| group.records.iter())
        .map(|record| record.credits)
        .sum();

    // Every unit average must be known before any record is decided.
    let unit_averages: Vec<f64> = groups
        .iter()
        .map(|group| weighted_average(&group.records))
        .collect();

    let mut credits_validated = 0.0;
    let units: Vec<ValidatedUnit> = groups
        .into_iter()
        .zip(unit_averages)
        .map(|(group, unit_average)| {
            let records = group
                .records
                .into_iter()
                .map(|record| {
                    let status = classify(record.overall, unit_average, average);
                    if status.is_validated() {
                        credits_validated += record.credits;
                    }
                    tracing::debug!(
                        module = %record.module_code,
                        overall = record.overall,
                        unit_average,
                        status = status.tag(),
                        "module evaluated"
                    );
                    ValidatedRecord { record, status }
                })
                .collect();

            ValidatedUnit {
                code: group.code,
                average: unit_average,
                records,
            }
        })
        .collect();

    Evaluation {
        units,
        credits_total,
        credits_validated,
        // Exact comparison; any shortfall fails the semester.
        semester_validated: credits_validated == credits_total,
        average,
    }
}

fn student_identity(etudiant: &Etudiant) -> StudentIdentity {
    StudentIdentity {
        matricule: etudiant.matricule.clone(),
        last_name: etudiant.nom.clone(),
        first_name: etudiant.prenom.clone(),
        speciality: etudiant
            .departement
            .as_ref()
            .and_then(|departement| departement.intitule.clone()),
        email: etudiant.email.clone(),
    }
}

/// Builds the transcript for one bulletin. When a roster entry is given its
/// identity fields take precedence over the bulletin's.
pub fn build_transcript(
    bulletin: &Bulletin,
    roster: Option<&Etudiant>,
    signed_on: Option<NaiveDate>,
) -> Result<TranscriptDocument, IncompleteBulletin> {
    let (Some(etudiant), Some(semestre)) = (&bulletin.etudiant, &bulletin.semestre) else {
        return Err(IncompleteBulletin);
    };

    let mut student = student_identity(roster.unwrap_or(etudiant));
    if student.matricule.is_none() {
        student.matricule = etudiant.matricule.clone();
    }

    let groups = grades::group_by_unit(grades::records_from_entries(&bulletin.notes));
    let evaluation = evaluate(groups);

    Ok(TranscriptDocument {
        student,
        semester: SemesterIdentity {
            label: semestre.semestre.clone(),
            academic_year: semestre.annee.map(|year| year.to_string()),
        },
        units: evaluation.units,
        credits_total: evaluation.credits_total,
        credits_validated: evaluation.credits_validated,
        semester_validated: evaluation.semester_validated,
        average: Some(evaluation.average),
        signed_on,
    })
}
