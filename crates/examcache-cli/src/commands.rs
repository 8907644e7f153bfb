//! Command implementations over `ExamContext`.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use examcache_core::utils::{age_display, mask_phone, remaining_display};
use examcache_core::{Config, ExamContext, UploadJob, UploadRun, UploadState};
use tracing::info;

pub async fn login(ctx: &ExamContext, config: &Config, phone: Option<String>) -> Result<()> {
    let phone = match phone.or_else(|| config.last_phone.clone()) {
        Some(phone) => phone,
        None => prompt("Phone: ")?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let user = ctx.api().login(&phone, &password).await?;
    println!("Signed in as {} ({})", user.user_id, mask_phone(&user.phone));

    Config::remember_phone(&phone)?;
    Ok(())
}

pub async fn register(ctx: &ExamContext, phone: &str, code: &str) -> Result<()> {
    let password = rpassword::prompt_password("Choose a password: ")
        .context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Repeat password: ")
        .context("Failed to read password")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    let user = ctx.api().register(phone, &password, code).await?;
    println!("Registered and signed in as {}", user.user_id);

    Config::remember_phone(phone)?;
    Ok(())
}

pub async fn send_code(ctx: &ExamContext, phone: &str) -> Result<()> {
    let expires_in = ctx.api().send_verification_code(phone).await?;
    println!(
        "Verification code sent to {}, valid for {} minutes",
        mask_phone(phone),
        expires_in / 60
    );
    Ok(())
}

pub fn logout(ctx: &ExamContext) -> Result<()> {
    ctx.api().logout()?;
    println!("Signed out");
    Ok(())
}

pub fn status(ctx: &ExamContext) -> Result<()> {
    let now = ctx.clock().now_ms();
    match ctx.tokens().session() {
        Some(session) => {
            println!("Signed in as {} ({})", session.user_id, mask_phone(&session.phone));
            println!("Session expires {}", remaining_display(session.time_until_expiry(now)));
            if ctx.tokens().get_token().is_none() {
                println!("The token key is gone from the key store; run `examcache login` again");
            }
        }
        None => println!("Not signed in"),
    }
    println!("Server: {}", ctx.config().api_base_url);
    println!("Data: {}", ctx.data_dir().display());
    Ok(())
}

pub async fn report(
    ctx: &ExamContext,
    exam_id: &str,
    refresh: bool,
    output: Option<&Path>,
) -> Result<()> {
    let html = ctx
        .reports()
        .get_report_content(exam_id, refresh)
        .await
        .with_context(|| format!("Report for {} is unavailable", exam_id))?;

    match output {
        Some(path) => {
            std::fs::write(path, &html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(exam_id, path = %path.display(), "Report written");
            eprintln!("Wrote {} bytes to {}", html.len(), path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(html.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

pub async fn delete_exam(ctx: &ExamContext, exam_id: &str) -> Result<()> {
    ctx.delete_exam(exam_id).await?;
    println!("Deleted exam {}", exam_id);
    Ok(())
}

pub async fn upload(ctx: &ExamContext, image: &Path) -> Result<()> {
    let job = ctx.uploads().enqueue(image)?;
    ctx.uploads().process_pending().await?;

    let job = ctx.uploads().job(&job.id)?.unwrap_or(job);
    match job.state {
        UploadState::Uploaded { ref exam_id } => {
            println!("Uploaded {} as exam {}", image.display(), exam_id);
            println!("Check progress with `examcache exams status {}`", exam_id);
        }
        UploadState::Pending => {
            let wait = Duration::milliseconds(job.next_attempt_at_ms - ctx.clock().now_ms());
            println!(
                "Upload failed ({}); queued as {}, next try {}. Run `examcache uploads run` to send it.",
                job.last_error.as_deref().unwrap_or("unknown error"),
                job.id,
                remaining_display(wait)
            );
        }
        UploadState::Failed { ref error } => anyhow::bail!("Upload rejected: {}", error),
    }
    Ok(())
}

pub fn list_uploads(ctx: &ExamContext) -> Result<()> {
    let jobs = ctx.uploads().jobs()?;
    if jobs.is_empty() {
        println!("No uploads queued");
        return Ok(());
    }
    let now = ctx.clock().now_ms();
    for job in &jobs {
        println!("{}", describe_job(job, now));
    }
    Ok(())
}

pub async fn run_uploads(ctx: &ExamContext) -> Result<()> {
    let run = ctx.uploads().process_pending().await?;
    print_run(&run);
    if let Some(due) = ctx.uploads().next_due_at()? {
        let wait = Duration::milliseconds(due - ctx.clock().now_ms());
        println!("Next retry {}", remaining_display(wait));
    }
    Ok(())
}

pub async fn retry_upload(ctx: &ExamContext, id: &str) -> Result<()> {
    if !ctx.uploads().retry(id)? {
        anyhow::bail!("No failed upload with id {}", id);
    }
    let run = ctx.uploads().process_pending().await?;
    print_run(&run);
    Ok(())
}

pub fn clear_uploads(ctx: &ExamContext) -> Result<()> {
    let removed = ctx.uploads().clear_finished()?;
    println!("Removed {} finished upload(s)", removed);
    Ok(())
}

pub async fn exam_status(ctx: &ExamContext, exam_id: &str) -> Result<()> {
    let status = ctx.api().fetch_exam_status(exam_id).await?;
    println!("{}: {} ({}%)", status.exam_id, status.status, status.progress);
    if let Some(ref step) = status.current_step {
        println!("Step: {}", step);
    }
    if let Some(secs) = status.estimated_remaining_time {
        println!("Finishes {}", remaining_display(Duration::seconds(i64::from(secs))));
    }
    if let Some(ref error) = status.error_message {
        println!("Error: {}", error);
    }
    if status.is_completed() {
        println!("Report ready: `examcache report {}`", status.exam_id);
    }
    Ok(())
}

pub async fn exam_detail(ctx: &ExamContext, exam_id: &str) -> Result<()> {
    let exam = ctx.api().fetch_exam_detail(exam_id).await?;
    println!("Exam {}", exam.exam_id);
    println!("  status:  {}", exam.status);
    let fields = [
        ("subject", exam.subject),
        ("grade", exam.grade),
        ("type", exam.exam_type),
        ("score", exam.total_score.map(|s| s.to_string())),
        ("created", exam.created_at),
        ("completed", exam.completed_at),
        ("report", exam.report_id),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("  {:<8} {}", format!("{}:", label), value);
        }
    }
    Ok(())
}

pub async fn exam_history(ctx: &ExamContext, skip: u32, limit: u32) -> Result<()> {
    let history = ctx.api().fetch_exam_history(skip, limit).await?;
    if history.exams.is_empty() {
        println!("No exams");
        return Ok(());
    }
    for exam in &history.exams {
        let score = exam.total_score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<16} {:>5}  {}",
            exam.exam_id,
            exam.status,
            score,
            exam.subject.as_deref().unwrap_or("")
        );
    }
    println!(
        "Showing {}-{} of {}",
        skip + 1,
        skip as usize + history.exams.len(),
        history.total
    );
    Ok(())
}

fn describe_job(job: &UploadJob, now: i64) -> String {
    let age = age_display(Duration::milliseconds(now - job.enqueued_at_ms));
    let state = match &job.state {
        UploadState::Pending if job.attempts == 0 => "waiting".to_string(),
        UploadState::Pending => format!(
            "retrying {} after {} attempt(s): {}",
            remaining_display(Duration::milliseconds(job.next_attempt_at_ms - now)),
            job.attempts,
            job.last_error.as_deref().unwrap_or("")
        ),
        UploadState::Uploaded { exam_id } => format!("uploaded as {}", exam_id),
        UploadState::Failed { error } => format!("failed: {}", error),
    };
    format!("{}  {}  queued {}  {}", job.id, job.image_path.display(), age, state)
}

fn print_run(run: &UploadRun) {
    if run.attempted() == 0 {
        println!("Nothing due");
    } else {
        println!(
            "{} uploaded, {} will retry, {} failed",
            run.uploaded, run.retrying, run.failed
        );
    }
}

pub fn clear_expired(ctx: &ExamContext) -> Result<()> {
    let removed = ctx.reports().clear_expired_cache()?;
    println!("Removed {} expired report(s)", removed);
    Ok(())
}

pub fn clear_all(ctx: &ExamContext) -> Result<()> {
    let removed = ctx.reports().clear_all_cache()?;
    println!("Removed {} cached report(s)", removed);
    Ok(())
}

pub fn show_cached(ctx: &ExamContext, exam_id: &str) -> Result<()> {
    let now = ctx.clock().now_ms();
    match ctx.reports().cached_report(exam_id)? {
        Some(report) => {
            let left = Duration::milliseconds(report.expires_at_ms - now);
            println!(
                "{}: cached {}, {} bytes, expires {}",
                exam_id,
                report.age_display(now),
                report.html_content.len(),
                remaining_display(left)
            );
        }
        None => println!("{}: not cached", exam_id),
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
