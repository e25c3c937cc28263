//! Study plan: the modules a student still has to retake.
//!
//! S3 also carries the non-validated modules of S1, S4 those of S2. Access to
//! S3/S4 is refused once S1+S2 leave 15 credits or more unvalidated.

use crate::error::{FetchError, PlanError};
use crate::grades::{self, weighted_mean};
use crate::models::{Etudiant, GradeRecord, Semestre, ValidationStatus};
use crate::source::BulletinSource;
use crate::validation::{EXTERNAL_UNIT_FLOOR, INTERNAL_FLOOR, PASS_MARK};

pub const BLOCKING_CREDITS: u32 = 15;

/// "3", "S3" and "S3 - 4" all give 3.
pub fn semester_number(label: &str) -> Option<u32> {
    let label = label.trim();
    if let Ok(number) = label.parse() {
        return Some(number);
    }
    label
        .strip_prefix('S')
        .and_then(|rest| rest.chars().next())
        .and_then(|digit| digit.to_digit(10))
}

pub fn included_semesters(number: u32) -> Vec<u32> {
    match number {
        3 => vec![3, 1],
        4 => vec![4, 2],
        other => vec![other],
    }
}

/// Every compensation requires an own score of at least 6 here.
pub fn classify(own: f64, unit_average: f64, general_average: f64) -> ValidationStatus {
    if own >= PASS_MARK {
        ValidationStatus::Direct
    } else if own >= INTERNAL_FLOOR && unit_average >= PASS_MARK {
        ValidationStatus::InternalCompensation
    } else if own >= INTERNAL_FLOOR
        && unit_average >= EXTERNAL_UNIT_FLOOR
        && general_average >= PASS_MARK
    {
        ValidationStatus::ExternalCompensation
    } else {
        ValidationStatus::NotValidated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanModule {
    pub code: String,
    pub title: Option<String>,
    pub unit_code: Option<String>,
    pub credits: f64,
    pub score: f64,
    pub status: ValidationStatus,
}

/// Tags every record against unrounded unit and general averages.
pub fn evaluate(records: &[GradeRecord]) -> Vec<PlanModule> {
    let general = weighted_mean(records).unwrap_or(0.0);

    records
        .iter()
        .map(|record| {
            let unit_average = record
                .unit_code
                .as_deref()
                .and_then(|unit| {
                    weighted_mean(
                        records
                            .iter()
                            .filter(|other| other.unit_code.as_deref() == Some(unit)),
                    )
                })
                .unwrap_or(0.0);
            let status = classify(record.overall, unit_average, general);
            tracing::debug!(
                module = %record.module_code,
                score = record.overall,
                unit_average,
                general,
                status = status.tag(),
                "plan module evaluated"
            );

            PlanModule {
                code: record.module_code.clone(),
                title: record.module_title.clone(),
                unit_code: record.unit_code.clone(),
                credits: record.credits,
                score: record.overall,
                status,
            }
        })
        .collect()
}

/// Sum of non-validated credits, truncated to whole credits.
pub fn non_validated_credits(modules: &[PlanModule]) -> u32 {
    let total: f64 = modules
        .iter()
        .filter(|module| !module.status.is_validated())
        .map(|module| module.credits)
        .sum();
    total.trunc() as u32
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanUnit {
    pub code: String,
    pub modules: Vec<PlanModule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudyPlan {
    pub matricule: String,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub semester: String,
    pub departement_code: Option<String>,
    pub departement_name: Option<String>,
    /// Non-validated credits of the plan, or of S1+S2 when blocked.
    pub total_credits: u32,
    pub blocked: Option<String>,
    /// Non-validated modules grouped by teaching unit.
    pub units: Vec<PlanUnit>,
    /// Every evaluated module, validated or not.
    pub modules: Vec<PlanModule>,
}

impl StudyPlan {
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

pub fn blocking_message(semester: &str, credits: u32) -> String {
    format!(
        "Accès au semestre {semester} bloqué: cet étudiant a {credits} crédits non validés de S1+S2 (maximum autorisé: {} crédits)",
        BLOCKING_CREDITS - 1
    )
}

fn group_non_validated(modules: &[PlanModule]) -> Vec<PlanUnit> {
    let mut units: Vec<PlanUnit> = Vec::new();
    for module in modules.iter().filter(|module| !module.status.is_validated()) {
        let code = module
            .unit_code
            .clone()
            .unwrap_or_else(|| crate::models::UNDEFINED_UNIT.to_string());
        match units.iter_mut().find(|unit| unit.code == code) {
            Some(unit) => unit.modules.push(module.clone()),
            None => units.push(PlanUnit {
                code,
                modules: vec![module.clone()],
            }),
        }
    }
    units
}

/// Collects the grade records of every listed semester. Semesters without a
/// bulletin for the student are skipped.
async fn collect_records(
    source: &dyn BulletinSource,
    matricule: &str,
    semestres: &[&Semestre],
) -> Result<(Vec<GradeRecord>, Option<Etudiant>), FetchError> {
    let mut records = Vec::new();
    let mut etudiant = None;

    for semestre in semestres {
        let Some(id) = semestre.id_semestre else {
            continue;
        };
        match source.bulletin(matricule, id).await {
            Ok(bulletin) => {
                tracing::info!(
                    matricule,
                    semestre = ?semestre.semestre,
                    notes = bulletin.notes.len(),
                    "notes collected"
                );
                records.extend(grades::records_from_entries(&bulletin.notes));
                if etudiant.is_none() {
                    etudiant = bulletin.etudiant;
                }
            }
            Err(FetchError::NotFound { .. }) => {
                tracing::info!(matricule, semestre = ?semestre.semestre, "no notes for semester");
            }
            Err(err) => return Err(err),
        }
    }

    Ok((records, etudiant))
}

fn semestres_numbered<'a>(semestres: &'a [Semestre], numbers: &[u32]) -> Vec<&'a Semestre> {
    semestres
        .iter()
        .filter(|semestre| {
            semestre
                .semestre
                .as_deref()
                .and_then(semester_number)
                .is_some_and(|number| numbers.contains(&number))
        })
        .collect()
}

pub async fn build_plan(
    source: &dyn BulletinSource,
    matricule: &str,
    semestre_id: i64,
) -> Result<StudyPlan, PlanError> {
    let semestres = source.semestres().await?;
    let target = semestres
        .iter()
        .find(|semestre| semestre.id_semestre == Some(semestre_id))
        .ok_or(PlanError::UnknownSemester(semestre_id))?;
    let label = target.semestre.clone().unwrap_or_default();
    let number =
        semester_number(&label).ok_or_else(|| PlanError::UnrecognizedLabel(label.clone()))?;

    let (records, etudiant) = collect_records(
        source,
        matricule,
        &semestres_numbered(&semestres, &included_semesters(number)),
    )
    .await?;
    let etudiant = etudiant.unwrap_or_default();
    let departement = etudiant.departement.clone().unwrap_or_default();

    let mut plan = StudyPlan {
        matricule: matricule.to_string(),
        last_name: etudiant.nom.clone(),
        first_name: etudiant.prenom.clone(),
        semester: label.clone(),
        departement_code: departement.code_dep,
        departement_name: departement.intitule,
        total_credits: 0,
        blocked: None,
        units: Vec::new(),
        modules: Vec::new(),
    };

    if matches!(number, 3 | 4) {
        let (first_year, _) =
            collect_records(source, matricule, &semestres_numbered(&semestres, &[1, 2])).await?;
        let owed = non_validated_credits(&evaluate(&first_year));
        tracing::info!(matricule, owed, "S1+S2 non-validated credits");
        if owed >= BLOCKING_CREDITS {
            plan.total_credits = owed;
            plan.blocked = Some(blocking_message(&label, owed));
            return Ok(plan);
        }
    }

    let modules = evaluate(&records);
    plan.total_credits = non_validated_credits(&modules);
    plan.units = group_non_validated(&modules);
    plan.modules = modules;
    tracing::info!(
        matricule,
        semester = %label,
        credits = plan.total_credits,
        "study plan built"
    );
    Ok(plan)
}
