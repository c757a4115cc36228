//! # Schoolroom CLI
//!
//! Drives the sync engine with several simulated devices sharing one
//! in-memory remote store.
//!
//! ```text
//! schoolroom demo                       teacher + two students run a lesson
//! schoolroom vote-race --students 20    concurrent and repeated poll votes
//! schoolroom offline                    work offline, reconnect, re-send
//! schoolroom packet --lesson l1         export a lesson packet to disk
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use schoolroom_core::chat::ChatMessage;
use schoolroom_core::lesson::{sample_lessons, Lesson};
use schoolroom_core::packet::LessonPacket;
use schoolroom_core::poll::Poll;
use schoolroom_core::progress::{StudentProgress, SyncState};
use schoolroom_core::sync_log::SyncLogEntry;
use schoolroom_sdk::{
    Channel, Classroom, Client, ClientConfig, ClientConfigBuilder, IdentitySlot, LessonId,
    MemoryRemote, ParticipantId, RemoteStore, Role, SdkError, VoteReceipt,
};
use schoolroom_store::MemoryBackend;
use tracing_subscriber::EnvFilter;

type Device = Classroom<MemoryRemote, MemoryBackend>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "schoolroom")]
#[command(about = "Offline-first classroom sync engine (in-memory remote)")]
#[command(version)]
struct Cli {
    /// Log engine activity at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML file with client settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// A teacher and two students go through lessons, chat, a poll and quizzes
    Demo,
    /// Many students vote at once, each retrying several times
    VoteRace {
        #[arg(long, default_value_t = 8)]
        students: usize,
        #[arg(long, default_value_t = 3)]
        retries: usize,
    },
    /// A student keeps working while the remote is unreachable, then reconnects
    Offline,
    /// Export a lesson packet to disk
    Packet {
        #[arg(long, default_value = "l1")]
        lesson: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

// ─── Devices ───────────────────────────────────────────────────────────────

fn join(
    remote: &Arc<MemoryRemote>,
    base: &ClientConfig,
    name: &str,
    role: Role,
    participant: &str,
) -> Result<Device> {
    let config = ClientConfigBuilder::new()
        .display_name(name)
        .role(role)
        .sync(base.sync.clone())
        .build();
    let device = Client::new(remote.clone(), config).join(
        MemoryBackend::new(),
        IdentitySlot::signed_in(ParticipantId::new(participant)),
    )?;
    Ok(device)
}

/// Give feed tasks time to deliver.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn verdict(ok: bool, good: &str, bad: &str) {
    if ok {
        println!("\n  {} {}", "✓".bright_green().bold(), good.bright_green().bold());
    } else {
        println!("\n  {} {}", "✗".bright_red().bold(), bad.bright_red().bold());
    }
}

fn show_lessons(owner: &str, lessons: &[Lesson]) {
    let border = "─".repeat(56);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^54} │",
        format!("Lessons on {}", owner).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);
    if lessons.is_empty() {
        println!("  │ {:^54} │", "(no lessons)".dimmed().to_string());
    }
    for lesson in lessons {
        let mut flags = Vec::new();
        if lesson.has_audio() {
            flags.push("audio");
        }
        if lesson.is_downloaded {
            flags.push("downloaded");
        }
        let line = format!(
            "{:<8} {:<24} {:>5} {:>4}KB {}",
            truncate(lesson.id.as_str(), 8),
            truncate(&lesson.title, 24),
            lesson.duration,
            lesson.size_kb,
            flags.join(",")
        );
        println!("  │ {:<54} │", line);
    }
    println!("  └{}┘", border);
}

fn show_chat(messages: &[ChatMessage]) {
    for message in messages {
        let author = match message.author {
            Role::Teacher => "teacher".bright_magenta(),
            Role::Student => "student".bright_blue(),
        };
        println!("    [{}] {}: {}", message.timestamp, author, message.text);
    }
}

fn show_poll(poll: Option<&Poll>) {
    let Some(poll) = poll else {
        step("(no active poll)");
        return;
    };
    println!("  {} {}", "?".bright_cyan(), poll.question.bold());
    for option in &poll.options {
        let votes = poll.votes_for(option);
        println!(
            "    {:<12} {:>3} {}",
            option,
            votes,
            "█".repeat(votes as usize).bright_green()
        );
    }
    println!("    {} {} from {} voters", "total".dimmed(), poll.total_votes(), poll.voters.len());
}

fn show_progress(rows: &[StudentProgress]) {
    for row in rows {
        let state = match row.sync_state {
            SyncState::Synced => "synced".bright_green(),
            SyncState::NotStarted => "not started".dimmed(),
        };
        println!(
            "    {:<8} quizzes={} {}",
            row.participant_id.as_str(),
            row.quizzes_completed,
            state
        );
    }
}

fn show_log(entries: &[SyncLogEntry]) {
    if entries.is_empty() {
        step("(sync log empty)");
    }
    for entry in entries {
        println!("    {}", entry.to_string().dimmed());
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo(config: &ClientConfig) -> Result<()> {
    header("DEMO: A lesson across three devices");

    let remote = Arc::new(MemoryRemote::new());
    remote.seed_lessons(sample_lessons());
    let teacher = join(&remote, config, "Teacher", Role::Teacher, "t1")?;
    let alice = join(&remote, config, "Alice", Role::Student, "s1")?;
    let bob = join(&remote, config, "Bob", Role::Student, "s2")?;
    settle().await;

    section("Phase 1: Lessons reach every device");
    show_lessons("alice", &alice.lessons());
    teacher.create_lesson("Photosynthesis")?;
    step("teacher: created 'Photosynthesis' (visible locally at once)");
    settle().await;
    show_lessons("bob", &bob.lessons());

    section("Phase 2: Recording audio");
    let l1 = LessonId::new("l1");
    let handle = teacher.start_recording(l1.clone())?;
    step("teacher: recording l1 ...");
    let outcome = handle.finished().await?;
    step(&format!("teacher: {:?}", outcome));
    settle().await;
    if let Some(lesson) = alice.lesson(&l1) {
        step(&format!(
            "alice sees l1 with duration {} and audio={}",
            lesson.duration,
            lesson.has_audio()
        ));
    }

    section("Phase 3: Chat");
    alice.send_chat("Can you go over slide 2 again?")?;
    teacher.send_chat("Sure, one moment.")?;
    bob.send_chat("Thanks!")?;
    settle().await;
    show_chat(&bob.chat());

    section("Phase 4: Poll");
    teacher.start_poll("Which topic next?", ["Optics", "Genetics"])?;
    settle().await;
    report_vote("alice", alice.submit_vote("Optics")?);
    report_vote("bob", bob.submit_vote("Genetics")?);
    report_vote("alice", alice.submit_vote("Genetics")?);
    settle().await;
    show_poll(teacher.poll().as_ref());

    section("Phase 5: Quizzes and progress");
    alice.answer_quiz(l1.clone(), "q1", "B")?;
    alice.answer_quiz(LessonId::new("l2"), "q1", "A")?;
    bob.answer_quiz(l1, "q1", "C")?;
    settle().await;
    let pass = teacher.refresh_progress()?.await?;
    step(&format!(
        "pass #{}: {} rows, {} omitted",
        pass.generation,
        pass.rows.len(),
        pass.omitted.len()
    ));
    show_progress(&teacher.progress());

    section("Teacher sync log");
    show_log(&teacher.sync_log());

    for device in [&teacher, &alice, &bob] {
        device.shutdown();
    }
    Ok(())
}

fn report_vote(who: &str, receipt: VoteReceipt) {
    match receipt {
        VoteReceipt::Accepted(_) => step(&format!("{}: vote accepted", who)),
        VoteReceipt::AlreadyVoted { choice } => step(&format!(
            "{}: already voted for {}, nothing written",
            who,
            choice.bright_yellow()
        )),
    }
}

// ─── Vote race ─────────────────────────────────────────────────────────────

async fn run_vote_race(config: &ClientConfig, students: usize, retries: usize) -> Result<()> {
    header("VOTE RACE: Concurrent and repeated votes");

    let remote = Arc::new(MemoryRemote::new());
    let teacher = join(&remote, config, "Teacher", Role::Teacher, "t1")?;
    let options = ["Yes", "No", "Later"];
    let mut devices = Vec::with_capacity(students);
    for n in 1..=students {
        devices.push(join(
            &remote,
            config,
            &format!("Student {}", n),
            Role::Student,
            &format!("s{}", n),
        )?);
    }

    section("Phase 1: Teacher opens a poll");
    teacher.start_poll("Ready for the quiz?", options)?;
    settle().await;
    step(&format!("{} students see the poll", students));

    section(&format!(
        "Phase 2: Every student votes {} times concurrently",
        retries
    ));
    let mut expected = [0u64; 3];
    let mut tasks = Vec::with_capacity(students);
    for (i, device) in devices.iter().enumerate() {
        let device = device.clone();
        let option = options[i % options.len()];
        expected[i % options.len()] += 1;
        tasks.push(tokio::spawn(async move {
            let mut accepted = 0usize;
            let mut duplicates = 0usize;
            for _ in 0..retries {
                match device.submit_vote(option)? {
                    VoteReceipt::Accepted(ticket) => {
                        ticket.settled().await?;
                        accepted += 1;
                    }
                    VoteReceipt::AlreadyVoted { .. } => duplicates += 1,
                }
            }
            Ok::<_, SdkError>((accepted, duplicates))
        }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for task in tasks {
        let (a, d) = task.await??;
        accepted += a;
        duplicates += d;
    }
    step(&format!("{} accepted, {} reported as already voted", accepted, duplicates));

    section("Phase 3: Remote tally");
    settle().await;
    let poll = remote.poll();
    show_poll(poll.as_ref());

    let tally_ok = poll.as_ref().is_some_and(|poll| {
        options
            .iter()
            .zip(expected)
            .all(|(option, want)| poll.votes_for(option) == want)
            && poll.total_votes() == students as u64
    });
    verdict(
        tally_ok,
        "EVERY STUDENT COUNTED EXACTLY ONCE",
        "TALLY DOES NOT MATCH THE NUMBER OF STUDENTS",
    );

    let seen = teacher.poll().map(|p| p.total_votes()).unwrap_or(0);
    step(&format!("teacher device shows {} votes", seen));
    Ok(())
}

// ─── Offline ───────────────────────────────────────────────────────────────

async fn run_offline(config: &ClientConfig) -> Result<()> {
    header("OFFLINE: Local-first work while disconnected");

    let remote = Arc::new(MemoryRemote::new());
    remote.seed_lessons(sample_lessons());
    let alice = join(&remote, config, "Alice", Role::Student, "s1")?;
    settle().await;
    show_lessons("alice", &alice.lessons());

    section("Phase 1: The remote goes away");
    remote.set_online(false);
    settle().await;
    for (channel, error) in alice.stalled_channels() {
        step(&format!("{} stalled: {}", channel, error));
    }
    step(&format!(
        "{} lessons still readable from the last snapshot",
        alice.lessons().len()
    ));

    section("Phase 2: Alice keeps working");
    let writes = [
        alice.answer_quiz(LessonId::new("l1"), "q1", "B")?,
        alice.answer_quiz(LessonId::new("l1"), "q2", "D")?,
        alice.answer_quiz(LessonId::new("l2"), "q1", "A")?,
        alice.send_chat("Answering offline")?,
    ];
    for submitted in writes {
        if let Err(e) = submitted.ticket.settled().await {
            step(&format!("{} -> {}", submitted.entity_id, e.to_string().bright_red()));
        }
    }
    step(&format!(
        "{} lessons answered locally, {} write faults recorded",
        alice.quiz_answers().lessons_answered(),
        alice.write_faults().len()
    ));

    section("Phase 3: Reconnect");
    remote.set_online(true);
    settle().await;
    step(&format!(
        "chat after reconnect: {} messages (the remote snapshot wins)",
        alice.chat().len()
    ));
    step(&format!(
        "quiz answers kept per lesson: {}",
        alice.quiz_answers().lessons_answered()
    ));

    section("Phase 4: Re-send answers");
    for ticket in alice.sync_answers()? {
        ticket.settled().await?;
    }
    let private = Channel::QuizAnswers(ParticipantId::new("s1"));
    let stored = remote.count(&private).await?;
    verdict(
        stored == alice.quiz_answers().lessons_answered(),
        "REMOTE HOLDS EVERY ANSWERED LESSON",
        "REMOTE IS MISSING ANSWERS",
    );
    show_log(&alice.sync_log());
    Ok(())
}

// ─── Packet ────────────────────────────────────────────────────────────────

async fn run_packet(config: &ClientConfig, lesson: &str, out: &Path) -> Result<()> {
    header("PACKET: Export a lesson for offline use");

    let remote = Arc::new(MemoryRemote::new());
    remote.seed_lessons(sample_lessons());
    let device = join(&remote, config, "Student", Role::Student, "s1")?;
    settle().await;

    let packet = device.download_packet(&LessonId::new(lesson))?;
    let path = out.join(packet.file_name());
    std::fs::write(&path, packet.to_json()?)
        .with_context(|| format!("writing {}", path.display()))?;
    step(&format!("wrote {}", path.display().to_string().bright_white()));
    step(&format!(
        "{} slides, audio: {}",
        packet.slides.len(),
        packet.audio.as_deref().unwrap_or("none")
    ));

    let parsed = LessonPacket::from_json(&std::fs::read_to_string(&path)?)?;
    verdict(
        parsed == packet,
        "PACKET ROUND-TRIPS WITHOUT LOSS",
        "PACKET CHANGED ON DISK",
    );
    show_lessons("student", &device.lessons());
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo => run_demo(&config).await,
        Commands::VoteRace { students, retries } => {
            run_vote_race(&config, students, retries).await
        }
        Commands::Offline => run_offline(&config).await,
        Commands::Packet { lesson, out } => run_packet(&config, &lesson, &out).await,
    }
}
