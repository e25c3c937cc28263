use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::FetchError;
use crate::models::{Bulletin, Departement, ElementModule, Etudiant, NoteEntry, Semestre};
use crate::source::BulletinSource;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One grade of one student, flattened with everything it references.
/// This is the CSV layout accepted by `import`.
#[derive(Debug, Clone, Deserialize)]
pub struct GradeRow {
    pub matricule: String,
    pub nom: Option<String>,
    pub prenom: Option<String>,
    pub email: Option<String>,
    pub promotion: Option<String>,
    pub code_dep: String,
    pub departement: String,
    pub semestre: String,
    pub annee: i32,
    pub code_em: String,
    pub code_eu: Option<String>,
    pub module: Option<String>,
    pub credits: f64,
    pub devoir: Option<f64>,
    pub examen: Option<f64>,
    pub rattrapage: Option<f64>,
    pub source_key: Option<String>,
}

/// Upserts every referenced row, then inserts the grade unless its
/// `source_key` is already known. Returns whether a grade was inserted.
async fn store_row(pool: &PgPool, row: &GradeRow) -> anyhow::Result<bool> {
    let departement_id: i64 = sqlx::query(
        r#"
        INSERT INTO releve.departements (code_dep, intitule)
        VALUES ($1, $2)
        ON CONFLICT (code_dep) DO UPDATE SET intitule = EXCLUDED.intitule
        RETURNING id
        "#,
    )
    .bind(&row.code_dep)
    .bind(&row.departement)
    .fetch_one(pool)
    .await?
    .get("id");

    let semestre_id: i64 = sqlx::query(
        r#"
        INSERT INTO releve.semestres (semestre, annee)
        VALUES ($1, $2)
        ON CONFLICT (semestre, annee) DO UPDATE SET semestre = EXCLUDED.semestre
        RETURNING id
        "#,
    )
    .bind(&row.semestre)
    .bind(row.annee)
    .fetch_one(pool)
    .await?
    .get("id");

    let etudiant_id: Uuid = sqlx::query(
        r#"
        INSERT INTO releve.etudiants
        (id, matricule, nom, prenom, email, promotion, departement_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (matricule) DO UPDATE
        SET nom = COALESCE(EXCLUDED.nom, releve.etudiants.nom),
            prenom = COALESCE(EXCLUDED.prenom, releve.etudiants.prenom),
            email = COALESCE(EXCLUDED.email, releve.etudiants.email),
            promotion = COALESCE(EXCLUDED.promotion, releve.etudiants.promotion),
            departement_id = EXCLUDED.departement_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&row.matricule)
    .bind(&row.nom)
    .bind(&row.prenom)
    .bind(&row.email)
    .bind(&row.promotion)
    .bind(departement_id)
    .fetch_one(pool)
    .await?
    .get("id");

    sqlx::query(
        r#"
        INSERT INTO releve.elements_module (code_em, code_eu, intitule, nombre_credits)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (code_em) DO UPDATE
        SET code_eu = EXCLUDED.code_eu,
            intitule = EXCLUDED.intitule,
            nombre_credits = EXCLUDED.nombre_credits
        "#,
    )
    .bind(&row.code_em)
    .bind(&row.code_eu)
    .bind(&row.module)
    .bind(row.credits)
    .execute(pool)
    .await?;

    let source_key = row
        .source_key
        .clone()
        .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

    let result = sqlx::query(
        r#"
        INSERT INTO releve.notes
        (id, etudiant_id, semestre_id, code_em, note_devoir, note_examen, note_rattrapage, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(etudiant_id)
    .bind(semestre_id)
    .bind(&row.code_em)
    .bind(row.devoir)
    .bind(row.examen)
    .bind(row.rattrapage)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn seed_row(
    matricule: &str,
    nom: &str,
    semestre: &str,
    module: (&str, &str, &str, f64),
    devoir: f64,
    examen: f64,
) -> GradeRow {
    let (code_em, code_eu, intitule, credits) = module;
    GradeRow {
        matricule: matricule.to_string(),
        nom: Some(nom.to_string()),
        prenom: Some("Mohamed".to_string()),
        email: Some(format!("{}@esp.mr", matricule.to_lowercase())),
        promotion: Some("2024".to_string()),
        code_dep: "GI".to_string(),
        departement: "Génie Informatique".to_string(),
        semestre: semestre.to_string(),
        annee: 2024,
        code_em: code_em.to_string(),
        code_eu: Some(code_eu.to_string()),
        module: Some(intitule.to_string()),
        credits,
        devoir: Some(devoir),
        examen: Some(examen),
        rattrapage: None,
        source_key: Some(format!("seed-{matricule}-{code_em}")),
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let anglais = ("HE11", "UE01", "Anglais", 2.0);
    let communication = ("HE12", "UE01", "Techniques de communication", 2.0);
    let analyse = ("ST11", "UE03", "Analyse 1", 4.0);
    let algebre = ("ST12", "UE03", "Algèbre 1", 4.0);
    let algorithmique = ("GI11", "UE05", "Algorithmique et programmation", 6.0);
    let systemes = ("GI31", "UE05", "Systèmes d'exploitation", 5.0);

    let rows = vec![
        seed_row("C22001", "Ahmed", "S1", anglais, 14.0, 13.0),
        seed_row("C22001", "Ahmed", "S1", communication, 12.0, 11.5),
        seed_row("C22001", "Ahmed", "S1", analyse, 9.0, 8.5),
        seed_row("C22001", "Ahmed", "S1", algebre, 13.0, 12.0),
        seed_row("C22001", "Ahmed", "S1", algorithmique, 15.0, 16.0),
        seed_row("C22002", "Salem", "S1", anglais, 8.0, 9.0),
        seed_row("C22002", "Salem", "S1", communication, 10.0, 7.0),
        seed_row("C22002", "Salem", "S1", analyse, 5.0, 6.0),
        seed_row("C22002", "Salem", "S1", algebre, 7.0, 8.0),
        seed_row("C22002", "Salem", "S1", algorithmique, 11.0, 9.5),
        seed_row("C22001", "Ahmed", "S3", systemes, 12.0, 10.0),
        seed_row("C22002", "Salem", "S3", systemes, 6.0, 7.0),
    ];

    let mut inserted = 0usize;
    for row in &rows {
        if store_row(pool, row).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<GradeRow>() {
        let row = result?;
        if store_row(pool, &row).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Serves bulletins from the local `releve` schema.
pub struct PgBulletinSource {
    pool: PgPool,
}

impl PgBulletinSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn etudiant_from_row(row: &sqlx::postgres::PgRow) -> Etudiant {
    Etudiant {
        matricule: row.get("matricule"),
        nom: row.get("nom"),
        prenom: row.get("prenom"),
        email: row.get("email"),
        promotion: row.get("promotion"),
        departement: Some(Departement {
            id_departement: row.get("departement_id"),
            code_dep: row.get("code_dep"),
            intitule: row.get("intitule"),
        }),
    }
}

const ETUDIANT_COLUMNS: &str = "e.matricule, e.nom, e.prenom, e.email, e.promotion, \
     e.departement_id, d.code_dep, d.intitule \
     FROM releve.etudiants e \
     LEFT JOIN releve.departements d ON d.id = e.departement_id";

#[async_trait]
impl BulletinSource for PgBulletinSource {
    async fn bulletin(&self, matricule: &str, semestre_id: i64) -> Result<Bulletin, FetchError> {
        let not_found = || FetchError::NotFound {
            resource: "bulletin".to_string(),
            matricule: Some(matricule.to_string()),
        };

        let etudiant = sqlx::query(&format!("SELECT {ETUDIANT_COLUMNS} WHERE e.matricule = $1"))
            .bind(matricule)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| etudiant_from_row(&row))
            .ok_or_else(not_found)?;

        let semestre = sqlx::query("SELECT id, semestre, annee FROM releve.semestres WHERE id = $1")
            .bind(semestre_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Semestre {
                id_semestre: Some(row.get("id")),
                semestre: Some(row.get("semestre")),
                annee: Some(row.get("annee")),
            })
            .ok_or_else(not_found)?;

        let rows = sqlx::query(
            r#"
            SELECT n.note_devoir, n.note_examen, n.note_rattrapage,
                   m.code_em, m.code_eu, m.intitule, m.nombre_credits
            FROM releve.notes n
            JOIN releve.etudiants e ON e.id = n.etudiant_id
            JOIN releve.elements_module m ON m.code_em = n.code_em
            WHERE e.matricule = $1 AND n.semestre_id = $2
            ORDER BY n.created_at, m.code_em
            "#,
        )
        .bind(matricule)
        .bind(semestre_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(not_found());
        }

        let notes = rows
            .iter()
            .map(|row| NoteEntry {
                note_devoir: row.get("note_devoir"),
                note_examen: row.get("note_examen"),
                note_rattrapage: row.get("note_rattrapage"),
                note_generale: None,
                element_module: Some(ElementModule {
                    code_em: row.get("code_em"),
                    code_eu: row.get("code_eu"),
                    intitule: row.get("intitule"),
                    nombre_credits: Some(row.get("nombre_credits")),
                }),
            })
            .collect();

        Ok(Bulletin {
            etudiant: Some(etudiant),
            semestre: Some(semestre),
            notes,
        })
    }

    async fn roster(
        &self,
        departement_id: i64,
        promotion: &str,
        semestre_id: i64,
    ) -> Result<Vec<Etudiant>, FetchError> {
        let rows = sqlx::query(&format!(
            "SELECT {ETUDIANT_COLUMNS} \
             WHERE e.departement_id = $1 AND e.promotion = $2 \
             AND EXISTS (SELECT 1 FROM releve.notes n WHERE n.etudiant_id = e.id AND n.semestre_id = $3) \
             ORDER BY e.matricule"
        ))
        .bind(departement_id)
        .bind(promotion)
        .bind(semestre_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(etudiant_from_row).collect())
    }

    async fn semestres(&self) -> Result<Vec<Semestre>, FetchError> {
        let rows = sqlx::query("SELECT id, semestre, annee FROM releve.semestres ORDER BY annee, semestre")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Semestre {
                id_semestre: Some(row.get("id")),
                semestre: Some(row.get("semestre")),
                annee: Some(row.get("annee")),
            })
            .collect())
    }

    async fn departements(&self) -> Result<Vec<Departement>, FetchError> {
        let rows = sqlx::query("SELECT id, code_dep, intitule FROM releve.departements ORDER BY code_dep")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Departement {
                id_departement: Some(row.get("id")),
                code_dep: Some(row.get("code_dep")),
                intitule: Some(row.get("intitule")),
            })
            .collect())
    }
}
