use std::collections::HashMap;

use crate::models::{GradeRecord, NoteEntry, UnitGroup, UNDEFINED_UNIT};

const DEVOIR_WEIGHT: f64 = 0.4;
const EXAMEN_WEIGHT: f64 = 0.6;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A resit score above zero replaces the weighted devoir/examen mix.
pub fn overall_score(devoir: f64, examen: f64, rattrapage: Option<f64>) -> f64 {
    match rattrapage {
        Some(resit) if resit > 0.0 => resit,
        _ => round2(DEVOIR_WEIGHT * devoir + EXAMEN_WEIGHT * examen),
    }
}

/// Credit-weighted mean, unrounded. `None` when no credit weight is present.
pub fn weighted_mean<'a, I>(records: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a GradeRecord>,
{
    let (points, credits) = records
        .into_iter()
        .fold((0.0, 0.0), |(points, credits), record| {
            (points + record.overall * record.credits, credits + record.credits)
        });

    if credits > 0.0 {
        Some(points / credits)
    } else {
        None
    }
}

/// Credit-weighted mean rounded to 2 decimals; 0 when the credit total is 0.
pub fn weighted_average<'a, I>(records: I) -> f64
where
    I: IntoIterator<Item = &'a GradeRecord>,
{
    weighted_mean(records).map(round2).unwrap_or(0.0)
}

fn sanitize(value: Option<f64>) -> f64 {
    match value {
        Some(number) if number.is_finite() => number,
        _ => 0.0,
    }
}

impl GradeRecord {
    pub fn from_entry(entry: &NoteEntry) -> Self {
        let module = entry.element_module.as_ref();
        let devoir = sanitize(entry.note_devoir);
        let examen = sanitize(entry.note_examen);
        let rattrapage = entry.note_rattrapage.filter(|value| value.is_finite());

        let has_components =
            entry.note_devoir.is_some() || entry.note_examen.is_some() || rattrapage.is_some();
        let overall = match entry.note_generale {
            Some(reported) if !has_components && reported.is_finite() => round2(reported),
            _ => overall_score(devoir, examen, rattrapage),
        };

        GradeRecord {
            module_code: module
                .and_then(|module| module.code_em.clone())
                .unwrap_or_default(),
            module_title: module.and_then(|module| module.intitule.clone()),
            unit_code: module
                .and_then(|module| module.code_eu.clone())
                .filter(|code| !code.trim().is_empty()),
            credits: sanitize(module.and_then(|module| module.nombre_credits)).max(0.0),
            devoir,
            examen,
            rattrapage,
            overall,
        }
    }
}

pub fn records_from_entries(entries: &[NoteEntry]) -> Vec<GradeRecord> {
    entries.iter().map(GradeRecord::from_entry).collect()
}

/// Groups records by teaching-unit code. Groups appear in order of first
/// occurrence; records without a unit land in [`UNDEFINED_UNIT`].
pub fn group_by_unit(records: Vec<GradeRecord>) -> Vec<UnitGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<UnitGroup> = Vec::new();

    for record in records {
        let code = match &record.unit_code {
            Some(code) => code.clone(),
            None => {
                tracing::warn!(module = %record.module_code, "module has no teaching unit");
                UNDEFINED_UNIT.to_string()
            }
        };

        let slot = *index.entry(code.clone()).or_insert_with(|| {
            groups.push(UnitGroup {
                code,
                records: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].records.push(record);
    }

    groups
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ElementModule;

    pub(crate) fn record(code: &str, unit: &str, credits: f64, devoir: f64, examen: f64) -> GradeRecord {
        GradeRecord {
            module_code: code.to_string(),
            module_title: Some(format!("Module {code}")),
            unit_code: Some(unit.to_string()),
            credits,
            devoir,
            examen,
            rattrapage: None,
            overall: overall_score(devoir, examen, None),
        }
    }

    fn entry(code: &str, unit: Option<&str>, credits: Option<f64>) -> NoteEntry {
        NoteEntry {
            note_devoir: Some(10.0),
            note_examen: Some(10.0),
            note_rattrapage: None,
            note_generale: None,
            element_module: Some(ElementModule {
                code_em: Some(code.to_string()),
                code_eu: unit.map(str::to_string),
                intitule: Some("Algèbre".to_string()),
                nombre_credits: credits,
            }),
        }
    }

    #[test]
    fn overall_mixes_devoir_and_examen() {
        assert_eq!(overall_score(12.0, 14.0, None), 13.2);
        assert_eq!(overall_score(5.0, 5.0, None), 5.0);
        assert_eq!(overall_score(7.25, 11.5, Some(0.0)), round2(0.4 * 7.25 + 0.6 * 11.5));
    }

    #[test]
    fn positive_resit_replaces_overall() {
        assert_eq!(overall_score(2.0, 3.0, Some(11.5)), 11.5);
        assert_eq!(overall_score(18.0, 19.0, Some(4.0)), 4.0);
    }

    #[test]
    fn zero_credit_average_is_zero() {
        let records = vec![record("EM1", "UE1", 0.0, 15.0, 15.0)];
        assert_eq!(weighted_average(&records), 0.0);
        assert_eq!(weighted_average(&Vec::<GradeRecord>::new()), 0.0);
        assert_eq!(weighted_mean(&records), None);
    }

    #[test]
    fn average_weights_by_credit() {
        let records = vec![
            record("EM1", "UE1", 3.0, 12.0, 12.0),
            record("EM2", "UE1", 1.0, 5.0, 5.0),
        ];
        // (12 * 3 + 5 * 1) / 4
        assert_eq!(weighted_average(&records), 10.25);
    }

    #[test]
    fn missing_numbers_count_as_zero() {
        let record = GradeRecord::from_entry(&NoteEntry::default());
        assert_eq!(record.credits, 0.0);
        assert_eq!(record.overall, 0.0);
        assert_eq!(record.module_code, "");
        assert_eq!(record.unit_code, None);
    }

    #[test]
    fn reported_overall_used_without_components() {
        let reported = NoteEntry {
            note_devoir: None,
            note_examen: None,
            note_generale: Some(13.456),
            ..entry("EM1", Some("UE1"), Some(2.0))
        };
        assert_eq!(GradeRecord::from_entry(&reported).overall, 13.46);
    }

    #[test]
    fn groups_keep_input_order_and_bucket_unknown_units() {
        let records = records_from_entries(&[
            entry("ST11", Some("UE03"), Some(2.0)),
            entry("HE11", Some("UE01"), Some(3.0)),
            entry("XX01", None, Some(1.0)),
            entry("ST12", Some("UE03"), Some(2.0)),
            entry("XX02", Some("  "), Some(1.0)),
        ]);

        let groups = group_by_unit(records);
        let codes: Vec<&str> = groups.iter().map(|group| group.code.as_str()).collect();
        assert_eq!(codes, vec!["UE03", "UE01", UNDEFINED_UNIT]);

        let modules: Vec<&str> = groups[0]
            .records
            .iter()
            .map(|record| record.module_code.as_str())
            .collect();
        assert_eq!(modules, vec!["ST11", "ST12"]);
        assert_eq!(groups[2].records.len(), 2);
    }

    #[test]
    fn negative_credits_are_clamped() {
        let record = GradeRecord::from_entry(&entry("EM1", Some("UE1"), Some(-4.0)));
        assert_eq!(record.credits, 0.0);
    }
}
