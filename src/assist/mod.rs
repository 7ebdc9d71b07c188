//! AI assistance: goal decomposition and bucket summaries.
//!
//! Without credentials every call answers from a deterministic offline
//! template, so callers always get a result.

pub mod prompts;
pub mod providers;

pub use providers::{Prompt, TextGenerator};

use crate::config::Settings;
use crate::grouping::Granularity;
use crate::model::Task;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum AssistError {
    #[error("no API key configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not parse provider response: {0}")]
    Parse(String),
    #[error("provider returned an empty response")]
    EmptyResponse,
}

const EMPTY_SUMMARY: &str = "Unable to generate a summary.";

#[derive(Clone)]
pub struct Assistant {
    generator: Option<Arc<dyn TextGenerator>>,
    task_prompt: String,
    summary_prompt: String,
}

impl Assistant {
    pub fn offline() -> Self {
        Assistant {
            generator: None,
            task_prompt: prompts::DEFAULT_TASK_PROMPT.to_string(),
            summary_prompt: prompts::DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }

    /// Reads the key from settings, then from the environment.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_key(settings, settings.api_key_from_env())
    }

    pub fn with_key(settings: &Settings, api_key: Option<String>) -> Self {
        Assistant {
            generator: providers::from_settings(settings, api_key),
            task_prompt: settings
                .task_prompt
                .clone()
                .unwrap_or_else(|| prompts::DEFAULT_TASK_PROMPT.to_string()),
            summary_prompt: settings
                .summary_prompt
                .clone()
                .unwrap_or_else(|| prompts::DEFAULT_SUMMARY_PROMPT.to_string()),
        }
    }

    pub fn with_generator(generator: Arc<dyn TextGenerator>) -> Self {
        Assistant {
            generator: Some(generator),
            ..Assistant::offline()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.generator.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.generator.as_ref().map_or("offline", |g| g.name())
    }

    /// Splits `goal` into subtasks in the order the backend lists them.
    /// An empty list is a legitimate answer.
    pub async fn decompose(&self, goal: &str) -> Result<Vec<String>, AssistError> {
        let Some(generator) = &self.generator else {
            tracing::info!(goal, "no API key, using offline decomposition");
            return Ok(prompts::fallback_subtasks(goal));
        };
        let user = prompts::task_prompt(&self.task_prompt, goal) + prompts::JSON_SUFFIX;
        let prompt = Prompt::text(user)
            .with_system(prompts::JSON_SYSTEM_PROMPT)
            .expect_json();
        let raw = generator.generate(&prompt).await?;
        let tasks = prompts::parse_task_list(&raw)?;
        tracing::debug!(backend = generator.name(), count = tasks.len(), "decomposed goal");
        Ok(tasks)
    }

    /// Markdown report for a bucket titled `title`.
    pub async fn summarize(
        &self,
        title: &str,
        tasks: &[Task],
        granularity: Granularity,
    ) -> Result<String, AssistError> {
        let Some(generator) = &self.generator else {
            return Ok(prompts::fallback_summary(title, tasks));
        };
        let user = prompts::summary_prompt(&self.summary_prompt, title, tasks, granularity);
        let prompt = Prompt::text(user).with_system(prompts::SUMMARY_SYSTEM_PROMPT);
        match generator.generate(&prompt).await {
            Err(AssistError::EmptyResponse) => Ok(EMPTY_SUMMARY.to_string()),
            other => other,
        }
    }

    /// Sends a trivial prompt to verify the credentials.
    pub async fn check_connection(&self) -> Result<(), AssistError> {
        let generator = self.generator.as_ref().ok_or(AssistError::NotConfigured)?;
        match generator.generate(&Prompt::text("Hi").limit(5)).await {
            Ok(_) | Err(AssistError::EmptyResponse) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, fn() -> AssistError>,
        seen: Mutex<Vec<Prompt>>,
    }

    impl Scripted {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Scripted {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: fn() -> AssistError) -> Arc<Self> {
            Arc::new(Scripted {
                reply: Err(err),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &Prompt) -> Result<String, AssistError> {
            self.seen.lock().unwrap().push(prompt.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn offline_decomposition_mentions_goal() {
        let tasks = Assistant::offline().decompose("Plan trip").await.unwrap();
        assert_eq!(
            tasks,
            vec![
                "Research Plan trip".to_string(),
                "Draft outline for Plan trip".to_string(),
                "Review and refine Plan trip".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn decomposition_uses_custom_template_and_json_mode() {
        let backend = Scripted::replying("```json\n{\"tasks\":[\"One\",\"Two\"]}\n```");
        let settings = Settings {
            task_prompt: Some("Split: {{goal}}".into()),
            ..Settings::default()
        };
        let mut assistant = Assistant::with_key(&settings, None);
        assistant.generator = Some(backend.clone() as Arc<dyn TextGenerator>);

        let tasks = assistant.decompose("Move house").await.unwrap();
        assert_eq!(tasks, vec!["One".to_string(), "Two".to_string()]);
        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].json);
        assert!(seen[0].user.starts_with("Split: Move house"));
        assert!(seen[0].user.ends_with(prompts::JSON_SUFFIX));
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let assistant = Assistant::with_generator(Scripted::failing(|| AssistError::Status {
            status: 401,
            body: "bad key".into(),
        }));
        assert!(matches!(
            assistant.decompose("x").await,
            Err(AssistError::Status { status: 401, .. })
        ));
        assert!(assistant.check_connection().await.is_err());
    }

    #[tokio::test]
    async fn empty_summary_gets_placeholder() {
        let assistant = Assistant::with_generator(Scripted::failing(|| AssistError::EmptyResponse));
        let text = assistant
            .summarize("Today", &[], Granularity::Day)
            .await
            .unwrap();
        assert_eq!(text, EMPTY_SUMMARY);
    }

    #[tokio::test]
    async fn offline_connection_check_reports_missing_key() {
        assert!(matches!(
            Assistant::offline().check_connection().await,
            Err(AssistError::NotConfigured)
        ));
        assert_eq!(Assistant::offline().backend_name(), "offline");
    }
}
