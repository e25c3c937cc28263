//! Per-student transcript pipeline and its batch forms: zip archives and
//! e-mail dispatch.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use base64::Engine;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

use crate::error::BatchError;
use crate::events::{EventBus, TranscriptEvent};
use crate::models::{EmailPayload, Etudiant};
use crate::pdf::{self, Logo};
use crate::source::{BulletinSource, MailDispatcher};
use crate::validation;

pub const LIST_ARCHIVE_NAME: &str = "bulletins.zip";
pub const DEFAULT_CONCURRENCY: usize = 4;

/// What happens to the batch when one student fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The first failure fails the batch; nothing is packaged or sent.
    #[default]
    FailFast,
    /// Failures are collected next to the successes.
    Isolated,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub semestre_id: i64,
    pub policy: FailurePolicy,
    pub concurrency: usize,
    pub signed_on: Option<NaiveDate>,
}

impl BatchOptions {
    pub fn new(semestre_id: i64) -> Self {
        Self {
            semestre_id,
            policy: FailurePolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            signed_on: None,
        }
    }
}

/// A student to render, with the roster entry when the batch came from one.
#[derive(Debug, Clone)]
pub struct Target {
    pub matricule: String,
    pub roster: Option<Etudiant>,
}

impl Target {
    pub fn matricule(matricule: impl Into<String>) -> Self {
        Self {
            matricule: matricule.into(),
            roster: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedTranscript {
    pub matricule: String,
    pub email: Option<String>,
    pub pdf: Vec<u8>,
}

/// Successes in input order, plus failures under [`FailurePolicy::Isolated`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub transcripts: Vec<RenderedTranscript>,
    pub failures: Vec<BatchError>,
}

/// Naming of the PDF entries inside an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Bulletin,
    Releve,
}

impl EntryKind {
    pub fn entry_name(self, matricule: &str) -> String {
        match self {
            Self::Bulletin => format!("{matricule}_bulletin.pdf"),
            Self::Releve => format!("{matricule}_releve.pdf"),
        }
    }
}

pub fn department_archive_name(promotion: &str, departement_id: i64) -> String {
    format!("releves-{promotion}-dept-{departement_id}.zip")
}

/// Splits free text on whitespace, commas and semicolons. Duplicates are
/// dropped, first occurrence wins.
pub fn parse_matricules(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    input
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .map(str::trim)
        .filter(|matricule| !matricule.is_empty())
        .filter(|matricule| seen.insert(matricule.to_string()))
        .map(str::to_string)
        .collect()
}

pub struct Orchestrator<'a> {
    source: &'a dyn BulletinSource,
    logo: Option<&'a Logo>,
    events: Option<&'a EventBus>,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(source: &'a dyn BulletinSource) -> Self {
        Self {
            source,
            logo: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_logo(mut self, logo: Option<&'a Logo>) -> Self {
        self.logo = logo;
        self
    }

    pub fn with_events(mut self, events: &'a EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn publish(&self, event: TranscriptEvent) {
        if let Some(bus) = self.events {
            bus.publish(event);
        }
    }

    /// Resolves a department cohort into batch targets. Roster entries
    /// without a matricule are skipped.
    pub async fn roster_targets(
        &self,
        departement_id: i64,
        promotion: &str,
        semestre_id: i64,
    ) -> Result<Vec<Target>, BatchError> {
        let roster = self
            .source
            .roster(departement_id, promotion, semestre_id)
            .await
            .map_err(BatchError::Roster)?;

        let targets: Vec<Target> = roster
            .into_iter()
            .filter_map(|etudiant| {
                match etudiant.matricule.clone().filter(|m| !m.trim().is_empty()) {
                    Some(matricule) => Some(Target {
                        matricule,
                        roster: Some(etudiant),
                    }),
                    None => {
                        tracing::warn!(nom = ?etudiant.nom, "roster entry without matricule skipped");
                        None
                    }
                }
            })
            .collect();

        tracing::info!(departement_id, promotion, count = targets.len(), "roster loaded");
        Ok(targets)
    }

    /// Fetches, evaluates and renders one student's transcript.
    pub async fn transcript(
        &self,
        target: &Target,
        options: &BatchOptions,
    ) -> Result<RenderedTranscript, BatchError> {
        if self.cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }

        let matricule = target.matricule.clone();
        self.publish(TranscriptEvent::Started {
            matricule: matricule.clone(),
        });

        let result = self.render_target(target, options).await;
        match &result {
            Ok(rendered) => self.publish(TranscriptEvent::Rendered {
                matricule,
                bytes: rendered.pdf.len(),
            }),
            Err(err) => self.publish(TranscriptEvent::Failed {
                matricule,
                reason: err.to_string(),
            }),
        }
        result
    }

    async fn render_target(
        &self,
        target: &Target,
        options: &BatchOptions,
    ) -> Result<RenderedTranscript, BatchError> {
        let matricule = &target.matricule;
        let bulletin = self
            .source
            .bulletin(matricule, options.semestre_id)
            .await
            .map_err(|source| BatchError::Fetch {
                matricule: matricule.clone(),
                source,
            })?;

        let document = validation::build_transcript(&bulletin, target.roster.as_ref(), options.signed_on)
            .map_err(|_| BatchError::Incomplete {
                matricule: matricule.clone(),
            })?;

        let pdf = pdf::render(&document, self.logo).map_err(|source| BatchError::Render {
            matricule: matricule.clone(),
            source,
        })?;

        Ok(RenderedTranscript {
            matricule: matricule.clone(),
            email: document.student.email.filter(|email| !email.trim().is_empty()),
            pdf,
        })
    }

    /// Runs every target with at most `options.concurrency` in flight.
    /// Results keep the input order.
    pub async fn run(
        &self,
        targets: &[Target],
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        if targets.is_empty() {
            return Err(BatchError::NoStudents);
        }

        let pipelines = stream::iter(targets.iter().map(|target| self.transcript(target, options)))
            .buffered(options.concurrency.max(1));

        match options.policy {
            FailurePolicy::FailFast => {
                let transcripts = pipelines.try_collect::<Vec<_>>().await?;
                Ok(BatchReport {
                    transcripts,
                    failures: Vec::new(),
                })
            }
            FailurePolicy::Isolated => {
                let outcomes: Vec<Result<RenderedTranscript, BatchError>> = pipelines.collect().await;
                let mut report = BatchReport::default();
                for outcome in outcomes {
                    match outcome {
                        Ok(transcript) => report.transcripts.push(transcript),
                        Err(BatchError::Cancelled) => return Err(BatchError::Cancelled),
                        Err(err) => report.failures.push(err),
                    }
                }
                Ok(report)
            }
        }
    }

    /// Runs the batch and packs the PDFs into a zip archive.
    pub async fn archive(
        &self,
        targets: &[Target],
        options: &BatchOptions,
        kind: EntryKind,
    ) -> Result<(Vec<u8>, BatchReport), BatchError> {
        let report = self.run(targets, options).await?;
        if report.transcripts.is_empty() {
            return Err(nothing_succeeded(report.failures));
        }

        let entries: Vec<(String, &[u8])> = report
            .transcripts
            .iter()
            .map(|transcript| (kind.entry_name(&transcript.matricule), transcript.pdf.as_slice()))
            .collect();
        let bytes = build_zip(&entries)?;

        self.publish(TranscriptEvent::Packaged {
            entries: entries.len(),
            failures: report.failures.len(),
        });
        Ok((bytes, report))
    }

    /// Runs the batch and posts `{email, pdfBase64}` items to the mailer.
    /// Returns the number of e-mails handed over.
    pub async fn email(
        &self,
        targets: &[Target],
        options: &BatchOptions,
        mailer: &dyn MailDispatcher,
    ) -> Result<(usize, BatchReport), BatchError> {
        let mut report = self.run(targets, options).await?;
        let (payloads, missing) = email_payloads(&report.transcripts);

        if let Some(first) = missing.first() {
            if options.policy == FailurePolicy::FailFast {
                return Err(BatchError::MissingEmail {
                    matricule: first.clone(),
                });
            }
        }
        report.failures.extend(
            missing
                .into_iter()
                .map(|matricule| BatchError::MissingEmail { matricule }),
        );

        if payloads.is_empty() {
            return Err(nothing_succeeded(report.failures));
        }

        mailer
            .send_transcripts(&payloads)
            .await
            .map_err(BatchError::Dispatch)?;

        self.publish(TranscriptEvent::Packaged {
            entries: payloads.len(),
            failures: report.failures.len(),
        });
        Ok((payloads.len(), report))
    }
}

/// Base64 payloads for transcripts with an address, and the matricules
/// without one.
/// Error for a batch that produced nothing: the collected failures when
/// there are any, otherwise an empty selection.
fn nothing_succeeded(failures: Vec<BatchError>) -> BatchError {
    if failures.is_empty() {
        BatchError::NoStudents
    } else {
        BatchError::AllFailed(failures)
    }
}

pub fn email_payloads(transcripts: &[RenderedTranscript]) -> (Vec<EmailPayload>, Vec<String>) {
    let mut payloads = Vec::new();
    let mut missing = Vec::new();
    for transcript in transcripts {
        match &transcript.email {
            Some(email) => payloads.push(EmailPayload {
                email: email.clone(),
                pdf_base64: base64::engine::general_purpose::STANDARD.encode(&transcript.pdf),
            }),
            None => missing.push(transcript.matricule.clone()),
        }
    }
    (payloads, missing)
}

/// Deflated zip with a fixed timestamp on every entry.
pub fn build_zip(entries: &[(String, &[u8])]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for (name, bytes) in entries {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use crate::error::FetchError;
    use crate::models::{Bulletin, Departement, ElementModule, NoteEntry, Semestre};

    #[derive(Default)]
    struct FakeSource {
        bulletins: HashMap<String, Bulletin>,
        roster: Vec<Etudiant>,
        offline: bool,
    }

    impl FakeSource {
        fn with_students(matricules: &[&str]) -> Self {
            let bulletins = matricules
                .iter()
                .map(|matricule| (matricule.to_string(), bulletin(matricule)))
                .collect();
            Self {
                bulletins,
                ..Self::default()
            }
        }
    }

    fn bulletin(matricule: &str) -> Bulletin {
        Bulletin {
            etudiant: Some(Etudiant {
                matricule: Some(matricule.to_string()),
                nom: Some("Nom".to_string()),
                prenom: Some("Prénom".to_string()),
                email: Some(format!("{}@esp.mr", matricule.to_lowercase())),
                ..Default::default()
            }),
            semestre: Some(Semestre {
                id_semestre: Some(1),
                semestre: Some("S1".to_string()),
                annee: Some(2024),
            }),
            notes: vec![NoteEntry {
                note_devoir: Some(12.0),
                note_examen: Some(14.0),
                element_module: Some(ElementModule {
                    code_em: Some("HE01".to_string()),
                    code_eu: Some("UE01".to_string()),
                    intitule: Some("Communication".to_string()),
                    nombre_credits: Some(3.0),
                }),
                ..Default::default()
            }],
        }
    }

    #[async_trait]
    impl BulletinSource for FakeSource {
        async fn bulletin(&self, matricule: &str, _semestre_id: i64) -> Result<Bulletin, FetchError> {
            // Earlier students answer later, so completion order differs from input order.
            let delay = 30u64.saturating_sub(matricule.len() as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.offline {
                return Err(FetchError::Unreachable("connection refused".to_string()));
            }
            self.bulletins
                .get(matricule)
                .cloned()
                .ok_or_else(|| FetchError::from_status(404, String::new(), "bulletin", Some(matricule)))
        }

        async fn roster(&self, _: i64, _: &str, _: i64) -> Result<Vec<Etudiant>, FetchError> {
            Ok(self.roster.clone())
        }

        async fn semestres(&self) -> Result<Vec<Semestre>, FetchError> {
            Ok(Vec::new())
        }

        async fn departements(&self) -> Result<Vec<Departement>, FetchError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        sent: Mutex<Vec<EmailPayload>>,
    }

    #[async_trait]
    impl MailDispatcher for FakeMailer {
        async fn send_transcripts(&self, payloads: &[EmailPayload]) -> Result<(), FetchError> {
            self.sent.lock().unwrap().extend_from_slice(payloads);
            Ok(())
        }
    }

    fn targets(matricules: &[&str]) -> Vec<Target> {
        matricules.iter().map(|m| Target::matricule(*m)).collect()
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn matricules_are_split_and_deduplicated() {
        assert_eq!(
            parse_matricules(" C1, C2;C3\nC1  C4;; "),
            vec!["C1", "C2", "C3", "C4"]
        );
        assert!(parse_matricules(" ,; ").is_empty());
    }

    #[test]
    fn entry_and_archive_names() {
        assert_eq!(EntryKind::Bulletin.entry_name("C1"), "C1_bulletin.pdf");
        assert_eq!(EntryKind::Releve.entry_name("C1"), "C1_releve.pdf");
        assert_eq!(department_archive_name("2024", 3), "releves-2024-dept-3.zip");
    }

    #[tokio::test]
    async fn one_failure_fails_the_whole_batch() {
        let source = FakeSource::with_students(&["C1", "C3"]);
        let orchestrator = Orchestrator::new(&source);

        let err = orchestrator
            .archive(&targets(&["C1", "C2", "C3"]), &BatchOptions::new(1), EntryKind::Bulletin)
            .await
            .unwrap_err();

        assert_matches!(err, BatchError::Fetch { ref matricule, source: FetchError::NotFound { .. } } if matricule == "C2");
    }

    #[tokio::test]
    async fn isolated_policy_packages_successes() {
        let source = FakeSource::with_students(&["C1", "C3"]);
        let orchestrator = Orchestrator::new(&source);
        let options = BatchOptions {
            policy: FailurePolicy::Isolated,
            ..BatchOptions::new(1)
        };

        let (archive, report) = orchestrator
            .archive(&targets(&["C1", "C2", "C3"]), &options, EntryKind::Bulletin)
            .await
            .unwrap();

        assert_eq!(entry_names(&archive), vec!["C1_bulletin.pdf", "C3_bulletin.pdf"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].matricule(), Some("C2"));
    }

    #[tokio::test]
    async fn archive_entries_follow_input_order() {
        let matricules = ["A", "BB", "CCC", "DDDD"];
        let source = FakeSource::with_students(&matricules);
        let orchestrator = Orchestrator::new(&source);

        let (archive, _) = orchestrator
            .archive(&targets(&matricules), &BatchOptions::new(1), EntryKind::Releve)
            .await
            .unwrap();

        assert_eq!(
            entry_names(&archive),
            vec!["A_releve.pdf", "BB_releve.pdf", "CCC_releve.pdf", "DDDD_releve.pdf"]
        );

        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        let mut first = Vec::new();
        zip.by_index(0).unwrap().read_to_end(&mut first).unwrap();
        assert!(first.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn archives_are_reproducible() {
        let source = FakeSource::with_students(&["C1", "C2"]);
        let orchestrator = Orchestrator::new(&source);
        let options = BatchOptions::new(1);
        let list = targets(&["C1", "C2"]);

        let (first, _) = orchestrator.archive(&list, &options, EntryKind::Bulletin).await.unwrap();
        let (second, _) = orchestrator.archive(&list, &options, EntryKind::Bulletin).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let source = FakeSource::default();
        let err = Orchestrator::new(&source)
            .run(&[], &BatchOptions::new(1))
            .await
            .unwrap_err();
        assert_matches!(err, BatchError::NoStudents);
    }

    #[tokio::test]
    async fn cancelled_batch_stops() {
        let source = FakeSource::with_students(&["C1"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Orchestrator::new(&source)
            .with_cancellation(cancel)
            .run(&targets(&["C1"]), &BatchOptions::new(1))
            .await
            .unwrap_err();
        assert_matches!(err, BatchError::Cancelled);
    }

    #[tokio::test]
    async fn roster_entries_without_matricule_are_skipped() {
        let source = FakeSource {
            roster: vec![
                Etudiant {
                    matricule: Some("C1".to_string()),
                    email: Some("roster@esp.mr".to_string()),
                    ..Default::default()
                },
                Etudiant {
                    nom: Some("Sans matricule".to_string()),
                    ..Default::default()
                },
            ],
            ..FakeSource::with_students(&["C1"])
        };
        let orchestrator = Orchestrator::new(&source);

        let found = orchestrator.roster_targets(2, "2024", 1).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].matricule, "C1");

        let report = orchestrator.run(&found, &BatchOptions::new(1)).await.unwrap();
        assert_eq!(report.transcripts[0].email.as_deref(), Some("roster@esp.mr"));
    }

    #[tokio::test]
    async fn email_batch_posts_base64_pdfs() {
        let source = FakeSource::with_students(&["C1", "C2"]);
        let mailer = FakeMailer::default();

        let (sent, _) = Orchestrator::new(&source)
            .email(&targets(&["C1", "C2"]), &BatchOptions::new(1), &mailer)
            .await
            .unwrap();

        assert_eq!(sent, 2);
        let payloads = mailer.sent.lock().unwrap();
        assert_eq!(payloads[0].email, "c1@esp.mr");
        let pdf = base64::engine::general_purpose::STANDARD
            .decode(&payloads[1].pdf_base64)
            .unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn missing_email_fails_fast_before_dispatch() {
        let mut source = FakeSource::with_students(&["C1", "C2"]);
        if let Some(etudiant) = source.bulletins.get_mut("C2").and_then(|b| b.etudiant.as_mut()) {
            etudiant.email = None;
        }
        let mailer = FakeMailer::default();

        let err = Orchestrator::new(&source)
            .email(&targets(&["C1", "C2"]), &BatchOptions::new(1), &mailer)
            .await
            .unwrap_err();

        assert_matches!(err, BatchError::MissingEmail { ref matricule } if matricule == "C2");
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn isolated_archive_keeps_the_cause_when_everyone_fails() {
        let source = FakeSource {
            offline: true,
            ..FakeSource::with_students(&["C1", "C2"])
        };
        let options = BatchOptions {
            policy: FailurePolicy::Isolated,
            ..BatchOptions::new(1)
        };

        let err = Orchestrator::new(&source)
            .archive(&targets(&["C1", "C2"]), &options, EntryKind::Bulletin)
            .await
            .unwrap_err();

        assert_matches!(err, BatchError::AllFailed(ref failures) if failures.len() == 2);
        assert_eq!(
            err.user_message(),
            "Impossible de contacter le serveur. Vérifiez votre connexion."
        );
    }

    #[tokio::test]
    async fn isolated_email_reports_missing_addresses_when_none_remain() {
        let mut source = FakeSource::with_students(&["C1"]);
        if let Some(etudiant) = source.bulletins.get_mut("C1").and_then(|b| b.etudiant.as_mut()) {
            etudiant.email = None;
        }
        let mailer = FakeMailer::default();
        let options = BatchOptions {
            policy: FailurePolicy::Isolated,
            ..BatchOptions::new(1)
        };

        let err = Orchestrator::new(&source)
            .email(&targets(&["C1"]), &options, &mailer)
            .await
            .unwrap_err();

        assert_matches!(
            err,
            BatchError::AllFailed(ref failures)
                if matches!(failures.as_slice(), [BatchError::MissingEmail { matricule }] if matricule == "C1")
        );
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn progress_is_published() {
        let source = FakeSource::with_students(&["C1"]);
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        Orchestrator::new(&source)
            .with_events(&bus)
            .archive(&targets(&["C1"]), &BatchOptions::new(1), EntryKind::Bulletin)
            .await
            .unwrap();

        assert_matches!(rx.recv().await.unwrap(), TranscriptEvent::Started { .. });
        assert_matches!(rx.recv().await.unwrap(), TranscriptEvent::Rendered { .. });
        assert_matches!(
            rx.recv().await.unwrap(),
            TranscriptEvent::Packaged { entries: 1, failures: 0 }
        );
    }
}
