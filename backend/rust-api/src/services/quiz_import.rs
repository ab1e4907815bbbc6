//! Quiz documents: the verbose and compact JSON shapes, the batch wrapper,
//! and the importer/exporter that move them in and out of the stores.

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::models::{
    Answer, AnswerId, Category, CategoryId, PassingScore, Points, Question, QuestionDifficulty,
    QuestionId, Quiz, QuizId, Tag, TimeLimit,
};
use crate::services::repositories::{
    CategoryRepository, QuestionRepository, QuizRepository, Repositories, TagRepository,
};
use crate::utils::time::Clock;

pub const DEFAULT_TIME_LIMIT: i64 = 60;
pub const DEFAULT_PASSING_SCORE: i64 = 70;
pub const DEFAULT_POINTS: i64 = 10;
pub const BATCH_VERSION: u32 = 1;
const FALLBACK_CATEGORY: &str = "general";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseQuiz {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub time_limit: i64,
    pub passing_score: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub questions: Vec<VerboseQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseQuestion {
    pub text: String,
    pub points: i64,
    pub answers: Vec<VerboseAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseAnswer {
    pub text: String,
    pub is_correct: bool,
}

/// Short-key form meant for generated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactQuiz {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<u32>,
    pub t: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub d: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cat: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<i64>,
    pub q: Vec<CompactQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactQuestion {
    pub t: String,
    pub a: Vec<String>,
    /// Index of the correct answer in `a`.
    pub c: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMeta {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cat: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFile {
    pub batch: BatchMeta,
    pub quizzes: Vec<CompactQuiz>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    Verbose,
    Compact,
    Batch,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::Verbose => "verbose",
            ImportFormat::Compact => "compact",
            ImportFormat::Batch => "batch",
        }
    }
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quiz normalized to the verbose shape, plus the category name it asked for.
#[derive(Debug, Clone)]
pub struct QuizDraft {
    pub quiz: VerboseQuiz,
    pub category_name: Option<String>,
}

pub fn detect_format(document: &Value) -> DomainResult<ImportFormat> {
    let object = document
        .as_object()
        .ok_or_else(|| DomainError::invalid("quiz document must be a JSON object"))?;
    if object.contains_key("batch") && object.contains_key("quizzes") {
        Ok(ImportFormat::Batch)
    } else if object.contains_key("t") {
        Ok(ImportFormat::Compact)
    } else if object.contains_key("title") {
        Ok(ImportFormat::Verbose)
    } else {
        Err(DomainError::invalid(
            "unknown format: unable to detect quiz structure",
        ))
    }
}

pub fn parse_document(document: Value) -> DomainResult<(ImportFormat, Vec<QuizDraft>)> {
    let format = detect_format(&document)?;
    let drafts = match format {
        ImportFormat::Batch => {
            let batch: BatchFile = decode(document, format)?;
            batch
                .quizzes
                .into_iter()
                .map(|quiz| compact_to_draft(quiz, batch.batch.cat.as_deref(), &batch.batch.tags))
                .collect()
        }
        ImportFormat::Compact => {
            let compact: CompactQuiz = decode(document, format)?;
            vec![compact_to_draft(compact, None, &[])]
        }
        ImportFormat::Verbose => {
            let mut quiz: VerboseQuiz = decode(document, format)?;
            quiz.tags = dedup_tags(quiz.tags);
            vec![QuizDraft {
                quiz,
                category_name: None,
            }]
        }
    };
    Ok((format, drafts))
}

pub fn parse_str(data: &str) -> DomainResult<(ImportFormat, Vec<QuizDraft>)> {
    let document: Value = serde_json::from_str(data)
        .map_err(|e| DomainError::invalid(format!("invalid JSON: {}", e)))?;
    parse_document(document)
}

fn decode<T: serde::de::DeserializeOwned>(document: Value, format: ImportFormat) -> DomainResult<T> {
    serde_json::from_value(document)
        .map_err(|e| DomainError::invalid(format!("failed to parse {} JSON: {}", format, e)))
}

/// Expands the short keys, applying defaults and merging batch metadata.
pub fn compact_to_draft(compact: CompactQuiz, batch_cat: Option<&str>, batch_tags: &[String]) -> QuizDraft {
    let tags = dedup_tags(batch_tags.iter().cloned().chain(compact.tags).collect());
    let questions = compact
        .q
        .into_iter()
        .map(|question| {
            let correct = question.c;
            VerboseQuestion {
                text: question.t,
                points: question.p.unwrap_or(DEFAULT_POINTS),
                answers: question
                    .a
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| VerboseAnswer {
                        text,
                        is_correct: i as i64 == correct,
                    })
                    .collect(),
            }
        })
        .collect();

    let category_name = compact
        .cat
        .filter(|cat| !cat.trim().is_empty())
        .or_else(|| batch_cat.map(str::to_string).filter(|cat| !cat.trim().is_empty()));

    QuizDraft {
        quiz: VerboseQuiz {
            title: compact.t,
            description: compact.d,
            category_id: None,
            time_limit: compact.l.unwrap_or(DEFAULT_TIME_LIMIT),
            passing_score: compact.p.unwrap_or(DEFAULT_PASSING_SCORE),
            tags,
            questions,
        },
        category_name,
    }
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(tags.len());
    for tag in tags {
        if !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

pub fn validate(quiz: &VerboseQuiz) -> DomainResult<()> {
    if quiz.title.trim().is_empty() {
        return Err(DomainError::invalid("title is required"));
    }
    if quiz.time_limit <= 0 {
        return Err(DomainError::invalid("timeLimit must be positive"));
    }
    if !(0..=100).contains(&quiz.passing_score) {
        return Err(DomainError::invalid("passingScore must be between 0 and 100"));
    }
    if quiz.questions.is_empty() {
        return Err(DomainError::invalid("at least one question is required"));
    }

    for (i, question) in quiz.questions.iter().enumerate() {
        let n = i + 1;
        if question.text.trim().is_empty() {
            return Err(DomainError::invalid(format!("question {}: text is required", n)));
        }
        if question.points <= 0 {
            return Err(DomainError::invalid(format!(
                "question {}: points must be positive",
                n
            )));
        }
        if question.answers.len() < 2 {
            return Err(DomainError::invalid(format!(
                "question {}: at least 2 answers required",
                n
            )));
        }
        let correct = question.answers.iter().filter(|a| a.is_correct).count();
        if correct != 1 {
            return Err(DomainError::invalid(format!(
                "question {}: exactly one answer must be correct (found {})",
                n, correct
            )));
        }
    }
    Ok(())
}

/// `language:*` tags mean programming, `domain:x` means x, anything else is general.
pub fn infer_category(tags: &[String]) -> String {
    if tags.iter().any(|tag| tag.starts_with("language:")) {
        return "programming".to_string();
    }
    tags.iter()
        .find_map(|tag| tag.strip_prefix("domain:"))
        .filter(|domain| !domain.is_empty())
        .unwrap_or(FALLBACK_CATEGORY)
        .to_string()
}

fn difficulty_from_tags(tags: &[String]) -> Option<QuestionDifficulty> {
    tags.iter()
        .filter_map(|tag| tag.strip_prefix("difficulty:"))
        .find_map(|value| QuestionDifficulty::parse(value).ok())
}

/// Lowercase, hyphen-separated file stem for an exported quiz.
pub fn sanitize_filename(title: &str) -> String {
    let lowered = title.to_lowercase().replace(' ', "-");
    let mut name = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        let keep = c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
        if keep && !(c == '-' && name.ends_with('-')) {
            name.push(c);
        }
    }
    let name = name.trim_matches('-');
    if name.is_empty() {
        "quiz".to_string()
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedQuiz {
    pub id: QuizId,
    pub title: String,
    pub question_count: u32,
    pub category_id: Option<CategoryId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub format: ImportFormat,
    pub dry_run: bool,
    pub imported: Vec<ImportedQuiz>,
    /// Titles already present in the store.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSummary {
    pub files: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct QuizImporter {
    quizzes: Arc<dyn QuizRepository>,
    questions: Arc<dyn QuestionRepository>,
    categories: Arc<dyn CategoryRepository>,
    tags: Arc<dyn TagRepository>,
    clock: Arc<dyn Clock>,
}

impl QuizImporter {
    pub fn new(repos: &Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            quizzes: repos.quizzes.clone(),
            questions: repos.questions.clone(),
            categories: repos.categories.clone(),
            tags: repos.tags.clone(),
            clock,
        }
    }

    pub async fn import_str(&self, data: &str, dry_run: bool) -> DomainResult<ImportReport> {
        let (format, drafts) = parse_str(data)?;
        self.import_drafts(format, drafts, dry_run).await
    }

    pub async fn import_document(&self, document: Value, dry_run: bool) -> DomainResult<ImportReport> {
        let (format, drafts) = parse_document(document)?;
        self.import_drafts(format, drafts, dry_run).await
    }

    pub async fn import_file(&self, path: &Path, dry_run: bool) -> DomainResult<ImportReport> {
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            DomainError::invalid(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.import_str(&data, dry_run).await
    }

    /// Imports every `*.json` file of `dir`, logging and counting failures.
    pub async fn seed_from_dir(&self, dir: &Path) -> DomainResult<SeedSummary> {
        let files = json_files(dir).await?;
        let mut summary = SeedSummary {
            files: files.len(),
            ..SeedSummary::default()
        };

        for file in files {
            match self.import_file(&file, false).await {
                Ok(report) => {
                    summary.imported += report.imported.len();
                    summary.skipped += report.skipped.len();
                }
                Err(e) => {
                    tracing::warn!("Skipping quiz file {}: {}", file.display(), e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Seeded quizzes from {}: {} imported, {} skipped, {} failed",
            dir.display(),
            summary.imported,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    /// Validates every draft first, so a bad batch imports nothing.
    async fn import_drafts(
        &self,
        format: ImportFormat,
        drafts: Vec<QuizDraft>,
        dry_run: bool,
    ) -> DomainResult<ImportReport> {
        for (i, draft) in drafts.iter().enumerate() {
            validate(&draft.quiz).map_err(|e| {
                DomainError::invalid(format!(
                    "validation failed for quiz {}: {}",
                    i + 1,
                    e.message()
                ))
            })?;
        }

        let mut report = ImportReport {
            format,
            dry_run,
            imported: Vec::new(),
            skipped: Vec::new(),
        };

        for draft in drafts {
            if self.quizzes.find_by_title(draft.quiz.title.trim()).await?.is_some() {
                tracing::info!("Quiz '{}' already exists, skipping", draft.quiz.title);
                report.skipped.push(draft.quiz.title);
                continue;
            }

            let category_id = if dry_run {
                None
            } else {
                self.resolve_category(&draft).await?
            };
            let (quiz, tags) = self.build(&draft, category_id)?;

            if !dry_run {
                for tag in &tags {
                    self.tags.save(tag).await?;
                }
                self.questions.save_all(quiz.questions()).await?;
                self.quizzes.save(&quiz).await?;
                tracing::info!(
                    "Imported quiz '{}' ({}) with {} questions",
                    quiz.title(),
                    quiz.id(),
                    quiz.questions().len()
                );
            }

            report.imported.push(ImportedQuiz {
                id: quiz.id(),
                title: quiz.title().to_string(),
                question_count: quiz.questions().len() as u32,
                category_id,
            });
        }
        Ok(report)
    }

    /// Explicit id, then the requested name, then a name inferred from tags.
    async fn resolve_category(&self, draft: &QuizDraft) -> DomainResult<Option<CategoryId>> {
        if let Some(raw) = draft.quiz.category_id.as_deref().filter(|id| !id.is_empty()) {
            let id = CategoryId::parse(raw)?;
            if self.categories.find_by_id(id).await?.is_none() {
                return Err(DomainError::not_found(format!("category {}", id)));
            }
            return Ok(Some(id));
        }

        let name = draft
            .category_name
            .clone()
            .unwrap_or_else(|| infer_category(&draft.quiz.tags));
        if let Some(existing) = self.categories.find_by_name(&name).await? {
            return Ok(Some(existing.id));
        }
        let category = Category::new(&name, self.clock.now())?;
        self.categories.save(&category).await?;
        tracing::info!("Created category {} ({})", category.name, category.id);
        Ok(Some(category.id))
    }

    fn build(&self, draft: &QuizDraft, category_id: Option<CategoryId>) -> DomainResult<(Quiz, Vec<Tag>)> {
        let now = self.clock.now();
        let source = &draft.quiz;
        let time_limit = TimeLimit::new(u32::try_from(source.time_limit).unwrap_or(u32::MAX))?;
        let passing_score = PassingScore::new(u32::try_from(source.passing_score).unwrap_or(u32::MAX))?;
        let mut quiz = Quiz::new(
            &source.title,
            &source.description,
            category_id,
            time_limit,
            passing_score,
            now,
        )?;

        let tags = source
            .tags
            .iter()
            .map(|name| {
                Tag::parse(name)
                    .map_err(|e| DomainError::invalid(format!("invalid tag '{}': {}", name, e.message())))
            })
            .collect::<DomainResult<Vec<Tag>>>()?;
        for tag in &tags {
            quiz.add_tag(tag, now)?;
        }

        let difficulty = difficulty_from_tags(&source.tags).unwrap_or_default();
        for (position, question) in source.questions.iter().enumerate() {
            let answers = question
                .answers
                .iter()
                .enumerate()
                .map(|(i, answer)| Answer::new(AnswerId::new(), &answer.text, answer.is_correct, i as u32))
                .collect::<DomainResult<Vec<Answer>>>()?;
            let points = Points::new(u32::try_from(question.points).unwrap_or(u32::MAX))?;
            let question = Question::new(QuestionId::new(), &question.text, points, position as u32, answers)?
                .with_difficulty(difficulty)
                .with_category(category_id);
            quiz.add_question(question, now)?;
        }

        Ok((quiz, tags))
    }
}

/// `*.json` files of `dir`, sorted by name.
pub async fn json_files(dir: &Path) -> DomainResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        DomainError::invalid(format!("failed to read directory {}: {}", dir.display(), e))
    })?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DomainError::internal(format!("failed to list {}: {}", dir.display(), e)))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub struct QuizExporter {
    quizzes: Arc<dyn QuizRepository>,
    categories: Arc<dyn CategoryRepository>,
    clock: Arc<dyn Clock>,
}

impl QuizExporter {
    pub fn new(repos: &Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            quizzes: repos.quizzes.clone(),
            categories: repos.categories.clone(),
            clock,
        }
    }

    pub async fn list(&self) -> DomainResult<Vec<Quiz>> {
        self.quizzes.find_all().await
    }

    /// One quiz when `quiz_id` is given, otherwise every quiz.
    pub async fn export(&self, quiz_id: Option<QuizId>) -> DomainResult<Vec<CompactQuiz>> {
        let quizzes = match quiz_id {
            Some(id) => vec![self
                .quizzes
                .find_by_id(id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("quiz {}", id)))?],
            None => self.quizzes.find_all().await?,
        };

        let names: HashMap<CategoryId, String> = self
            .categories
            .find_all()
            .await?
            .into_iter()
            .map(|category| (category.id, category.name))
            .collect();

        Ok(quizzes.iter().map(|quiz| to_compact(quiz, &names)).collect())
    }

    pub async fn export_batch(&self) -> DomainResult<BatchFile> {
        let quizzes = self.export(None).await?;
        let generated = Utc
            .timestamp_opt(self.clock.now(), 0)
            .single()
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true));
        Ok(BatchFile {
            batch: BatchMeta {
                version: BATCH_VERSION,
                generated,
                cat: None,
                tags: Vec::new(),
            },
            quizzes,
        })
    }
}

/// Compact form of a stored quiz; values equal to the import defaults are omitted.
pub fn to_compact(quiz: &Quiz, category_names: &HashMap<CategoryId, String>) -> CompactQuiz {
    let time_limit = i64::from(quiz.time_limit().seconds());
    let passing_score = i64::from(quiz.passing_score().percentage());
    CompactQuiz {
        v: None,
        t: quiz.title().to_string(),
        d: quiz.description().to_string(),
        cat: quiz
            .category_id()
            .and_then(|id| category_names.get(&id).cloned()),
        tags: quiz.tags().map(str::to_string).collect(),
        l: (time_limit != DEFAULT_TIME_LIMIT).then_some(time_limit),
        p: (passing_score != DEFAULT_PASSING_SCORE).then_some(passing_score),
        q: quiz
            .questions()
            .iter()
            .map(|question| {
                let points = i64::from(question.points().value());
                CompactQuestion {
                    t: question.text().to_string(),
                    a: question.answers().iter().map(|a| a.text().to_string()).collect(),
                    c: question
                        .answers()
                        .iter()
                        .position(|a| a.is_correct())
                        .unwrap_or_default() as i64,
                    p: (points != DEFAULT_POINTS).then_some(points),
                }
            })
            .collect(),
    }
}
