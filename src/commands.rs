use crate::cli::{ConfigSetArgs, EditArgs};
use crate::ui;
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Local, NaiveDate};
use smartdo::assist::Assistant;
use smartdo::config::{Profile, Settings, API_KEY_ENV};
use smartdo::controller::Planner;
use smartdo::filter::Filter;
use smartdo::grouping::{BucketKey, Granularity};
use smartdo::model::{format_date, parse_date, Task, TaskPatch};
use smartdo::notes::{attach_image, missing_images};
use smartdo::ordering::DropTarget;
use smartdo::store::{init_project_store, locate_data, DataLocation, YamlStore};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub fn init(samples: bool) -> Result<()> {
    let location = init_project_store()?;
    println!("Initialized task list at {}", location.tasks_path().display());
    if samples {
        let mut planner = open_planner(&location)?;
        let before = planner.tasks().len();
        planner.seed_samples(today());
        println!("Added {} sample tasks", planner.tasks().len() - before);
    }
    Ok(())
}

pub fn list(filter: Filter, group: Granularity) -> Result<()> {
    let (planner, location) = load_current_planner()?;
    let counts = planner.counts();
    println!(
        "Tasks ({}): {} all, {} active, {} completed",
        location.scope.label(),
        counts.all,
        counts.active,
        counts.completed
    );
    let buckets = planner.view(filter, group, today());
    if buckets.is_empty() {
        println!("  (no {} tasks)", filter.label().to_lowercase());
    }
    for bucket in buckets {
        let marker = if bucket.is_anchor { "> " } else { "" };
        println!(
            "{}{} [{}] ({})",
            marker,
            bucket.title,
            bucket.key,
            bucket.tasks.len()
        );
        for task in bucket.tasks {
            print_task(task);
        }
        println!();
    }
    Ok(())
}

pub async fn add(text: String, due: Option<String>, no_due: bool, ai: bool) -> Result<()> {
    let (mut planner, location) = load_current_planner()?;
    let due_date = if no_due {
        None
    } else {
        Some(parse_optional_date(due.as_deref())?.unwrap_or_else(today))
    };
    if ai {
        let assistant = Assistant::from_settings(&load_settings(&location)?);
        let ids = planner
            .decompose_and_create(&assistant, &text, due_date)
            .await
            .context("adding generated tasks")?;
        report_notice(&planner);
        for id in &ids {
            if let Some(task) = planner.get(id) {
                println!("Added task {}: {}", short_id(id), task.text);
            }
        }
    } else {
        let id = planner.create(&text, due_date).context("adding task")?;
        println!("Added task {}", short_id(&id));
    }
    Ok(())
}

pub fn done(id: String) -> Result<()> {
    let (mut planner, _) = load_current_planner()?;
    let id = planner.resolve_id(&id)?;
    let completed = planner.toggle_complete(&id)?;
    let state = if completed { "completed" } else { "active" };
    println!("Marked task {} {}", short_id(&id), state);
    Ok(())
}

pub fn edit(args: EditArgs) -> Result<()> {
    let (mut planner, _) = load_current_planner()?;
    let id = planner.resolve_id(&args.id)?;
    let mut patch = TaskPatch {
        text: args.text,
        ..TaskPatch::default()
    };
    if args.clear_due {
        patch.due_date = Some(None);
    } else if let Some(due) = parse_optional_date(args.due.as_deref())? {
        patch.due_date = Some(Some(due));
    }
    if args.clear_start {
        patch.start_date = Some(None);
    } else if let Some(start) = parse_optional_date(args.start.as_deref())? {
        patch.start_date = Some(Some(start));
    }
    if args.important {
        patch.is_important = Some(true);
    } else if args.not_important {
        patch.is_important = Some(false);
    }
    if args.clear_note {
        patch.description = Some(None);
    } else if let Some(note) = args.note {
        patch.description = Some(Some(note));
    }
    if patch.is_empty() {
        bail!("nothing to change; see `smartdo edit --help`");
    }
    planner
        .update(&id, &patch)
        .with_context(|| format!("updating task {}", id))?;
    println!("Updated task {}", short_id(&id));
    Ok(())
}

pub fn remove(id: String) -> Result<()> {
    let (mut planner, _) = load_current_planner()?;
    let id = planner.resolve_id(&id)?;
    let removed = planner.delete(&id)?;
    println!("Deleted task {}: {}", short_id(&id), removed.text);
    Ok(())
}

pub fn move_task(
    id: String,
    before: Option<String>,
    to_bucket: Option<String>,
    group: Granularity,
    filter: Filter,
) -> Result<()> {
    let (mut planner, _) = load_current_planner()?;
    let id = planner.resolve_id(&id)?;
    let target = match (before, to_bucket) {
        (Some(other), _) => DropTarget::Task(planner.resolve_id(&other)?),
        (None, Some(key)) => DropTarget::Bucket(BucketKey::parse(&key, group).ok_or_else(|| {
            anyhow!("invalid bucket key {} for {} grouping", key, group.label())
        })?),
        (None, None) => bail!("either --before or --to-bucket is required"),
    };
    let moved = planner
        .move_task(filter, group, today(), &id, &target)
        .with_context(|| format!("moving task {}", id))?;
    if moved {
        println!("Moved task {}", short_id(&id));
    } else {
        println!("Task {} is already there", short_id(&id));
    }
    Ok(())
}

pub fn show(id: String) -> Result<()> {
    let (planner, _) = load_current_planner()?;
    let id = planner.resolve_id(&id)?;
    let task = planner
        .get(&id)
        .ok_or_else(|| anyhow!("task {} not found", id))?;
    println!("{}", task.text);
    println!("  id:        {}", task.id);
    println!(
        "  status:    {}",
        if task.completed { "completed" } else { "active" }
    );
    println!("  created:   {}", task.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
    println!("  start:     {}", display_date(task.start_date));
    println!("  due:       {}", display_date(task.due_date));
    println!("  important: {}", if task.is_important { "yes" } else { "no" });
    if task.is_ai_generated {
        println!("  source:    generated");
    }
    if let Some(description) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
        println!();
        for line in description.lines() {
            println!("  {}", line);
        }
        let missing = missing_images(description, &task.images);
        if !missing.is_empty() {
            println!("  (missing images: {})", missing.join(", "));
        }
    }
    Ok(())
}

pub fn attach(id: String, file: PathBuf, alt: Option<String>) -> Result<()> {
    let (mut planner, _) = load_current_planner()?;
    let id = planner.resolve_id(&id)?;
    let bytes = fs::read(&file).with_context(|| format!("reading {:?}", file))?;
    let payload = format!("data:{};base64,{}", mime_for(&file), STANDARD.encode(bytes));
    let alt = alt.unwrap_or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    });

    let mut draft: Task = planner
        .get(&id)
        .cloned()
        .ok_or_else(|| anyhow!("task {} not found", id))?;
    let image_id = attach_image(&mut draft, &alt, payload);
    let patch = TaskPatch {
        description: Some(draft.description),
        images: Some(draft.images),
        ..TaskPatch::default()
    };
    planner.update(&id, &patch)?;
    println!("Attached image {} to task {}", image_id, short_id(&id));
    Ok(())
}

pub async fn summarize(bucket: String, group: Granularity, filter: Filter) -> Result<()> {
    let (mut planner, location) = load_current_planner()?;
    let key = BucketKey::parse(&bucket, group)
        .ok_or_else(|| anyhow!("invalid bucket key {} for {} grouping", bucket, group.label()))?;
    let request = planner
        .summary_request(&key, filter, group, today())
        .ok_or_else(|| anyhow!("bucket {} has no tasks in this view", key))?;
    let assistant = Assistant::from_settings(&load_settings(&location)?);
    match planner.summarize_group(&assistant, request).await {
        Some(summary) => {
            println!("{}", summary.content);
            Ok(())
        }
        None => {
            report_notice(&planner);
            bail!("summary failed")
        }
    }
}

pub fn config_show() -> Result<()> {
    let location = current_location()?;
    let settings = load_settings(&location)?;
    println!("Settings: {}", location.settings_path().display());
    println!("  provider:       {}", settings.provider.label());
    let key = match settings.masked_api_key() {
        Some(masked) => masked,
        None if settings.api_key_from_env().is_some() => format!("(from {})", API_KEY_ENV),
        None => "(not set, using offline answers)".to_string(),
    };
    println!("  api key:        {}", key);
    println!("  base url:       {}", settings.base_url.as_deref().unwrap_or("(default)"));
    println!("  model:          {}", settings.model.as_deref().unwrap_or("(default)"));
    println!(
        "  task prompt:    {}",
        if settings.task_prompt.is_some() { "custom" } else { "default" }
    );
    println!(
        "  summary prompt: {}",
        if settings.summary_prompt.is_some() { "custom" } else { "default" }
    );
    match &settings.profile {
        Some(profile) => println!("  signed in as:   {}", profile.name),
        None => println!("  signed in as:   (nobody)"),
    }
    Ok(())
}

pub fn config_set(args: ConfigSetArgs) -> Result<()> {
    let location = current_location()?;
    let mut settings = load_settings(&location)?;
    if let Some(provider) = args.provider {
        settings.provider = provider;
    }
    if let Some(key) = args.api_key {
        settings.api_key = blank_to_none(key);
    }
    if let Some(url) = args.base_url {
        settings.base_url = blank_to_none(url);
    }
    if let Some(model) = args.model {
        settings.model = blank_to_none(model);
    }
    if args.reset_prompts {
        settings.task_prompt = None;
        settings.summary_prompt = None;
    }
    if let Some(prompt) = args.task_prompt {
        settings.task_prompt = blank_to_none(prompt);
    }
    if let Some(prompt) = args.summary_prompt {
        settings.summary_prompt = blank_to_none(prompt);
    }
    save_settings(&location, &settings)?;
    println!("Saved settings to {}", location.settings_path().display());
    Ok(())
}

pub async fn config_test() -> Result<()> {
    let location = current_location()?;
    let assistant = Assistant::from_settings(&load_settings(&location)?);
    assistant
        .check_connection()
        .await
        .with_context(|| format!("testing {} connection", assistant.backend_name()))?;
    println!("Connection to {} works", assistant.backend_name());
    Ok(())
}

pub fn login(name: Option<String>) -> Result<()> {
    let location = current_location()?;
    let mut settings = load_settings(&location)?;
    let profile = Profile::mock(name);
    println!("Signed in as {}", profile.name);
    settings.profile = Some(profile);
    save_settings(&location, &settings)
}

pub fn logout() -> Result<()> {
    let location = current_location()?;
    let mut settings = load_settings(&location)?;
    if settings.profile.take().is_none() {
        println!("Nobody is signed in");
        return Ok(());
    }
    save_settings(&location, &settings)?;
    println!("Signed out");
    Ok(())
}

pub fn tui() -> Result<()> {
    let (planner, location) = load_current_planner()?;
    let settings = load_settings(&location)?;
    off_runtime(|| ui::run(planner, location, settings))
}

/// Where the TUI writes its log while it owns the terminal.
pub fn log_path() -> Result<PathBuf> {
    Ok(current_location()?.log_path())
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Runs a blocking loop on the current runtime thread while spawned tasks
/// keep making progress on the other workers.
fn off_runtime<R>(work: impl FnOnce() -> R) -> R {
    tokio::task::block_in_place(work)
}

fn current_location() -> Result<DataLocation> {
    let cwd = env::current_dir()?;
    locate_data(&cwd)
}

fn load_current_planner() -> Result<(Planner, DataLocation)> {
    let location = current_location()?;
    let planner = open_planner(&location)?;
    Ok((planner, location))
}

fn open_planner(location: &DataLocation) -> Result<Planner> {
    let store = YamlStore::open(location.tasks_path())
        .with_context(|| format!("opening {:?}", location.tasks_path()))?;
    Ok(Planner::load(Box::new(store))?)
}

fn load_settings(location: &DataLocation) -> Result<Settings> {
    Settings::load(&location.settings_path())
        .with_context(|| format!("loading {:?}", location.settings_path()))
}

fn save_settings(location: &DataLocation, settings: &Settings) -> Result<()> {
    settings
        .save(&location.settings_path())
        .with_context(|| format!("saving {:?}", location.settings_path()))
}

fn report_notice(planner: &Planner) {
    if let Some(notice) = planner.notice(Instant::now()) {
        eprintln!("warning: {}", notice);
    }
}

fn parse_optional_date(input: Option<&str>) -> Result<Option<NaiveDate>> {
    let raw = match input {
        Some(r) => r.trim(),
        None => return Ok(None),
    };
    if raw.is_empty() {
        return Ok(None);
    }
    parse_date(raw)
        .map(Some)
        .map_err(|_| anyhow!("invalid date format (use YYYY-MM-DD): {}", raw))
}

fn display_date(date: Option<NaiveDate>) -> String {
    date.map(format_date).unwrap_or_else(|| "-".to_string())
}

fn blank_to_none(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn print_task(task: &Task) {
    let check = if task.completed { "x" } else { " " };
    let mut line = format!("  [{}] {} {}", check, short_id(&task.id), task.text);
    if task.is_important {
        line.push_str(" !");
    }
    if task.is_ai_generated {
        line.push_str(" (ai)");
    }
    println!("{}", line);
    if let Some(start) = task.start_date {
        println!("      starts {}", format_date(start));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_work_progresses_while_the_loop_blocks() {
        let (tx, rx) = mpsc::channel();
        let received = off_runtime(|| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = tx.send("summary");
            });
            rx.recv_timeout(Duration::from_secs(5))
        });
        assert_eq!(received, Ok("summary"));
    }

    #[test]
    fn dates_parse_or_explain() {
        assert_eq!(parse_optional_date(None).unwrap(), None);
        assert_eq!(parse_optional_date(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_optional_date(Some("2024-02-29")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        let err = parse_optional_date(Some("29/02/2024")).unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(mime_for(Path::new("shot.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("diagram")), "image/png");
    }

    #[test]
    fn short_ids_never_panic() {
        assert_eq!(short_id("abcdefghij"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
    }
}
