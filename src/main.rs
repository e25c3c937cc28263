use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

mod accounts;
mod batch;
mod client;
mod db;
mod error;
mod events;
mod grades;
mod layout;
mod logging;
mod metrics;
mod models;
mod pdf;
mod plan;
mod report;
mod source;
mod validation;

use batch::{BatchOptions, EntryKind, FailurePolicy, Orchestrator, Target};
use client::ApiClient;
use error::BatchError;
use events::EventBus;
use source::BulletinSource;

#[derive(Parser)]
#[command(name = "releve-notes")]
#[command(about = "Academic transcripts: grade aggregation, compensation rules and PDF generation", long_about = None)]
struct Cli {
    /// Base URL of the scolarité backend
    #[arg(long, env = "SCOLARITE_API_URL", default_value = "http://localhost:8080", global = true)]
    api_url: String,

    /// Bearer token sent to the backend
    #[arg(long, env = "SCOLARITE_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Institution logo drawn in the transcript header
    #[arg(long, env = "RELEVE_LOGO", default_value = "images/logo_esp.png", global = true)]
    logo: PathBuf,

    /// Postgres URL of the local grade store
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    database_url: Option<String>,

    /// Where bulletins are read from
    #[arg(long, value_enum, default_value_t = SourceKind::Api, global = true)]
    source: SourceKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Api,
    Db,
}

#[derive(Args)]
struct BatchArgs {
    /// Package the successful transcripts even when some students fail
    #[arg(long)]
    keep_going: bool,
    /// Transcripts generated concurrently
    #[arg(long, default_value_t = batch::DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// Signature date (YYYY-MM-DD), today by default
    #[arg(long)]
    date: Option<NaiveDate>,
}

impl BatchArgs {
    fn options(&self, semestre_id: i64) -> BatchOptions {
        BatchOptions {
            semestre_id,
            policy: if self.keep_going {
                FailurePolicy::Isolated
            } else {
                FailurePolicy::FailFast
            },
            concurrency: self.concurrency,
            signed_on: Some(self.date.unwrap_or_else(today)),
        }
    }
}

#[derive(Args)]
struct MemberArgs {
    #[arg(long, default_value = "")]
    nom: String,
    #[arg(long, default_value = "")]
    prenom: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, env = "RELEVE_MEMBER_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Role code or name (ADMIN, CHEF_DEPT, CHEF_POLE, DE, RS)
    #[arg(long)]
    role: Option<accounts::Role>,
    #[arg(long)]
    departement: Option<i64>,
    #[arg(long)]
    pole: Option<i64>,
    /// Editing an existing account, the password may be left out
    #[arg(long)]
    edit: bool,
}

impl MemberArgs {
    fn form(&self) -> accounts::MemberForm {
        accounts::MemberForm {
            nom: self.nom.clone(),
            prenom: self.prenom.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
            role: self.role,
            departement_id: self.departement,
            pole_id: self.pole,
        }
    }

    fn mode(&self) -> accounts::FormMode {
        if self.edit {
            accounts::FormMode::Edit
        } else {
            accounts::FormMode::Create
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the local grade store schema
    InitDb,
    /// Load sample grades into the local store
    Seed,
    /// Import grade rows from a CSV file into the local store
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate the transcript of one student
    Releve {
        #[arg(long)]
        matricule: String,
        #[arg(long)]
        semestre: i64,
        #[arg(long, default_value = "releve_de_notes.pdf")]
        out: PathBuf,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Generate transcripts for a list of students into a zip archive
    #[command(group(
        ArgGroup::new("students")
            .args(["matricules", "file"])
            .required(true)
            .multiple(false)
    ))]
    Masse {
        #[arg(long)]
        semestre: i64,
        /// Matricules separated by spaces, commas or semicolons
        #[arg(long)]
        matricules: Option<String>,
        /// File holding the matricules
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value = batch::LIST_ARCHIVE_NAME)]
        out: PathBuf,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Generate transcripts for a department cohort into a zip archive
    Departement {
        #[arg(long)]
        semestre: i64,
        #[arg(long)]
        departement: i64,
        #[arg(long)]
        promotion: String,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// E-mail transcripts to students through the backend
    #[command(group(
        ArgGroup::new("scope")
            .args(["matricule", "matricules", "departement"])
            .required(true)
            .multiple(false)
    ))]
    Email {
        #[arg(long)]
        semestre: i64,
        #[arg(long)]
        matricule: Option<String>,
        #[arg(long)]
        matricules: Option<String>,
        #[arg(long, requires = "promotion")]
        departement: Option<i64>,
        #[arg(long, requires = "departement")]
        promotion: Option<String>,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Write the study plan of a student as markdown
    Plan {
        #[arg(long)]
        matricule: String,
        #[arg(long)]
        semestre: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List semesters
    Semestres,
    /// List departments
    Departements,
    /// Check a staff account form before submitting it to the backend
    Membre(MemberArgs),
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgPool> {
    let database_url =
        database_url.context("DATABASE_URL must be set to use the local grade store")?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Keeps the operator-facing message on top and the technical cause below it.
fn batch_failure(err: BatchError) -> anyhow::Error {
    if let BatchError::AllFailed(failures) = &err {
        print_failures(failures);
    }
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn print_failures(failures: &[BatchError]) {
    if failures.is_empty() {
        return;
    }
    println!("{} student(s) skipped:", failures.len());
    for failure in failures {
        println!(
            "- {}: {}",
            failure.matricule().unwrap_or("?"),
            failure.user_message()
        );
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

async fn read_matricules(inline: Option<String>, file: Option<PathBuf>) -> anyhow::Result<Vec<String>> {
    let text = match (inline, file) {
        (Some(inline), _) => inline,
        (None, Some(file)) => tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?,
        (None, None) => String::new(),
    };
    Ok(batch::parse_matricules(&text))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after in-flight transcripts");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logging::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect(cli.database_url.as_deref()).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
            return Ok(());
        }
        Commands::Seed => {
            let pool = connect(cli.database_url.as_deref()).await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} grades).");
            return Ok(());
        }
        Commands::Import { ref csv } => {
            let pool = connect(cli.database_url.as_deref()).await?;
            let inserted = db::import_csv(&pool, csv).await?;
            println!("Inserted {inserted} grades from {}.", csv.display());
            return Ok(());
        }
        Commands::Membre(ref member) => {
            let errors = accounts::validate(&member.form(), member.mode());
            if errors.is_empty() {
                println!("Account form is valid.");
                return Ok(());
            }
            for error in &errors {
                println!("- {error}");
            }
            anyhow::bail!("{} invalid field(s)", errors.len());
        }
        _ => {}
    }

    let api = ApiClient::new(cli.api_url.clone(), cli.token.clone())
        .context("failed to build the backend HTTP client")?;
    let store = match cli.source {
        SourceKind::Db => Some(db::PgBulletinSource::new(
            connect(cli.database_url.as_deref()).await?,
        )),
        SourceKind::Api => None,
    };
    let source: &dyn BulletinSource = match &store {
        Some(store) => store,
        None => &api,
    };

    let bus = EventBus::default();
    let logger = events::spawn_logger(&bus);
    let result = run(cli, source, &api, &bus).await;
    drop(bus);
    let _ = logger.await;
    result
}

async fn run(cli: Cli, source: &dyn BulletinSource, api: &ApiClient, bus: &EventBus) -> anyhow::Result<()> {
    match cli.command {
        Commands::Releve {
            matricule,
            semestre,
            out,
            date,
        } => {
            let logo = pdf::load_logo(&cli.logo).await;
            let options = BatchOptions {
                signed_on: Some(date.unwrap_or_else(today)),
                ..BatchOptions::new(semestre)
            };
            let transcript = Orchestrator::new(source)
                .with_logo(logo.as_ref())
                .with_events(bus)
                .transcript(&Target::matricule(matricule.trim()), &options)
                .await
                .map_err(batch_failure)?;
            write_output(&out, &transcript.pdf)?;
            println!("Transcript written to {}.", out.display());
        }
        Commands::Masse {
            semestre,
            matricules,
            file,
            out,
            batch,
        } => {
            let matricules = read_matricules(matricules, file).await?;
            let targets: Vec<Target> = matricules.into_iter().map(Target::matricule).collect();
            let logo = pdf::load_logo(&cli.logo).await;

            let (archive, report) = Orchestrator::new(source)
                .with_logo(logo.as_ref())
                .with_events(bus)
                .with_cancellation(cancel_on_ctrl_c())
                .archive(&targets, &batch.options(semestre), EntryKind::Bulletin)
                .await
                .map_err(batch_failure)?;
            write_output(&out, &archive)?;
            println!(
                "{} transcripts written to {}.",
                report.transcripts.len(),
                out.display()
            );
            print_failures(&report.failures);
        }
        Commands::Departement {
            semestre,
            departement,
            promotion,
            out,
            batch,
        } => {
            let logo = pdf::load_logo(&cli.logo).await;
            let orchestrator = Orchestrator::new(source)
                .with_logo(logo.as_ref())
                .with_events(bus)
                .with_cancellation(cancel_on_ctrl_c());
            let targets = orchestrator
                .roster_targets(departement, &promotion, semestre)
                .await
                .map_err(batch_failure)?;
            let (archive, report) = orchestrator
                .archive(&targets, &batch.options(semestre), EntryKind::Releve)
                .await
                .map_err(batch_failure)?;

            let out = out.unwrap_or_else(|| {
                PathBuf::from(batch::department_archive_name(&promotion, departement))
            });
            write_output(&out, &archive)?;
            println!(
                "{} transcripts written to {}.",
                report.transcripts.len(),
                out.display()
            );
            print_failures(&report.failures);
        }
        Commands::Email {
            semestre,
            matricule,
            matricules,
            departement,
            promotion,
            batch,
        } => {
            let logo = pdf::load_logo(&cli.logo).await;
            let orchestrator = Orchestrator::new(source)
                .with_logo(logo.as_ref())
                .with_events(bus)
                .with_cancellation(cancel_on_ctrl_c());

            let targets = match (departement, promotion) {
                (Some(departement), Some(promotion)) => orchestrator
                    .roster_targets(departement, &promotion, semestre)
                    .await
                    .map_err(batch_failure)?,
                _ => read_matricules(matricule.or(matricules), None)
                    .await?
                    .into_iter()
                    .map(Target::matricule)
                    .collect(),
            };

            let (sent, report) = orchestrator
                .email(&targets, &batch.options(semestre), api)
                .await
                .map_err(batch_failure)?;
            println!("{sent} transcripts sent by e-mail.");
            print_failures(&report.failures);
        }
        Commands::Plan {
            matricule,
            semestre,
            out,
        } => {
            let plan = plan::build_plan(source, matricule.trim(), semestre)
                .await
                .map_err(|err| {
                    let message = err.user_message();
                    anyhow::Error::new(err).context(message)
                })?;
            if plan.is_blocked() {
                tracing::warn!(matricule = %plan.matricule, semester = %plan.semester, "semester access blocked");
            }
            let markdown = report::build_plan_report(&plan);
            match out {
                Some(out) => {
                    write_output(&out, markdown.as_bytes())?;
                    println!("Study plan written to {}.", out.display());
                }
                None => print!("{markdown}"),
            }
        }
        Commands::Semestres => {
            let semestres = source.semestres().await.context("failed to list semesters")?;
            if semestres.is_empty() {
                println!("No semesters found.");
            }
            for semestre in semestres {
                println!(
                    "- {} {} ({})",
                    semestre.id_semestre.map(|id| id.to_string()).unwrap_or_default(),
                    semestre.semestre.unwrap_or_default(),
                    semestre.annee.map(|year| year.to_string()).unwrap_or_default()
                );
            }
        }
        Commands::Departements => {
            let departements = source
                .departements()
                .await
                .context("failed to list departments")?;
            if departements.is_empty() {
                println!("No departments found.");
            }
            for departement in departements {
                println!(
                    "- {} {} ({})",
                    departement
                        .id_departement
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                    departement.code_dep.unwrap_or_default(),
                    departement.intitule.unwrap_or_default()
                );
            }
        }
        Commands::InitDb | Commands::Seed | Commands::Import { .. } | Commands::Membre(_) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn masse_requires_a_student_list() {
        assert!(Cli::try_parse_from(["releve-notes", "masse", "--semestre", "1"]).is_err());
        let cli = Cli::try_parse_from([
            "releve-notes",
            "masse",
            "--semestre",
            "1",
            "--matricules",
            "C1,C2",
            "--keep-going",
        ])
        .unwrap();
        match cli.command {
            Commands::Masse { batch, out, .. } => {
                assert_eq!(batch.options(1).policy, FailurePolicy::Isolated);
                assert_eq!(out, PathBuf::from("bulletins.zip"));
            }
            _ => panic!("expected masse"),
        }
    }

    #[test]
    fn email_department_needs_promotion() {
        assert!(Cli::try_parse_from([
            "releve-notes",
            "email",
            "--semestre",
            "1",
            "--departement",
            "2"
        ])
        .is_err());
    }

    #[test]
    fn membre_parses_role_names() {
        let cli = Cli::try_parse_from([
            "releve-notes",
            "membre",
            "--nom",
            "Sidi",
            "--role",
            "CHEF_DEPT",
            "--edit",
        ])
        .unwrap();
        match cli.command {
            Commands::Membre(member) => {
                assert_eq!(member.role, Some(accounts::Role::ChefDepartement));
                assert_eq!(member.mode(), accounts::FormMode::Edit);
                assert!(accounts::validate(&member.form(), member.mode())
                    .contains(&accounts::FieldError::Required(accounts::Field::Departement)));
            }
            _ => panic!("expected membre"),
        }
        assert!(Cli::try_parse_from(["releve-notes", "membre", "--role", "9"]).is_err());
    }

    #[test]
    fn source_switch_parses() {
        let cli = Cli::try_parse_from(["releve-notes", "--source", "db", "semestres"]).unwrap();
        assert!(cli.source == SourceKind::Db);
    }
}
