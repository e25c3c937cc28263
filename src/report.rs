use std::fmt::Write;

use crate::plan::{PlanModule, StudyPlan};

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|value| !value.trim().is_empty()).unwrap_or("-")
}

fn module_line(module: &PlanModule) -> String {
    format!(
        "| {} | {} | {} | {:.2} | {} |",
        module.code,
        or_dash(module.title.as_deref()),
        module.credits,
        module.score,
        module.status.tag()
    )
}

pub fn build_plan_report(plan: &StudyPlan) -> String {
    let mut output = String::new();
    let full_name = [plan.last_name.as_deref(), plan.first_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    let _ = writeln!(output, "# Plan d'étude {}", plan.semester);
    let _ = writeln!(
        output,
        "Étudiant {} ({}), département {} - {}",
        if full_name.is_empty() { "-" } else { full_name.as_str() },
        plan.matricule,
        or_dash(plan.departement_code.as_deref()),
        or_dash(plan.departement_name.as_deref())
    );
    let _ = writeln!(output);

    if let Some(message) = &plan.blocked {
        let _ = writeln!(output, "## Accès bloqué");
        let _ = writeln!(output, "{message}");
        return output;
    }

    let _ = writeln!(output, "## Modules non validés");
    let _ = writeln!(output, "Total des crédits à reprendre : {}", plan.total_credits);

    if plan.units.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Tous les modules sont validés.");
    } else {
        for unit in &plan.units {
            let _ = writeln!(output);
            let _ = writeln!(output, "### {}", unit.code);
            let _ = writeln!(output, "| Code | Élément Module | Crédit | Note | Statut |");
            let _ = writeln!(output, "|---|---|---|---|---|");
            for module in &unit.modules {
                let _ = writeln!(output, "{}", module_line(module));
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Statuts de validation");

    if plan.modules.is_empty() {
        let _ = writeln!(output, "Aucune note enregistrée pour les semestres concernés.");
    } else {
        for module in &plan.modules {
            let _ = writeln!(
                output,
                "- {}: {:.2} ({})",
                module.code,
                module.score,
                module.status.tag()
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidationStatus;
    use crate::plan::{blocking_message, PlanUnit};

    fn module(code: &str, score: f64, status: ValidationStatus) -> PlanModule {
        PlanModule {
            code: code.to_string(),
            title: Some(format!("Module {code}")),
            unit_code: Some("UE05".to_string()),
            credits: 4.0,
            score,
            status,
        }
    }

    fn plan() -> StudyPlan {
        let failed = module("GI31", 4.0, ValidationStatus::NotValidated);
        StudyPlan {
            matricule: "C19042".to_string(),
            last_name: Some("Sidi".to_string()),
            first_name: Some("Ahmed".to_string()),
            semester: "S3".to_string(),
            departement_code: Some("GI".to_string()),
            departement_name: None,
            total_credits: 4,
            blocked: None,
            units: vec![PlanUnit {
                code: "UE05".to_string(),
                modules: vec![failed.clone()],
            }],
            modules: vec![module("GI32", 12.5, ValidationStatus::Direct), failed],
        }
    }

    #[test]
    fn report_lists_units_and_statuses() {
        let report = build_plan_report(&plan());

        assert!(report.starts_with("# Plan d'étude S3\n"));
        assert!(report.contains("Étudiant Sidi Ahmed (C19042), département GI - -"));
        assert!(report.contains("Total des crédits à reprendre : 4"));
        assert!(report.contains("### UE05"));
        assert!(report.contains("| GI31 | Module GI31 | 4 | 4.00 | NV |"));
        assert!(report.contains("- GI32: 12.50 (V)"));
    }

    #[test]
    fn blocked_plan_only_carries_the_message() {
        let mut plan = plan();
        plan.blocked = Some(blocking_message("S3", 16));

        let report = build_plan_report(&plan);
        assert!(report.contains("## Accès bloqué"));
        assert!(report.contains("16 crédits non validés"));
        assert!(!report.contains("### UE05"));
    }

    #[test]
    fn all_validated_plan_says_so() {
        let mut plan = plan();
        plan.units.clear();
        plan.total_credits = 0;

        assert!(build_plan_report(&plan).contains("Tous les modules sont validés."));
    }
}
