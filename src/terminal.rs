// ---------------------------------------------------------------------------
// Terminal front end: one player, line-oriented commands on stdin.
// ---------------------------------------------------------------------------

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use number_cards::CardPool;

use crate::session::{exhausted_message, wait_budget, Reveal, Session};

const EMPTY_POOL_WAIT: Duration = Duration::from_secs(3);

const HELP: &str = "\
Commands:
  n, next     draw the next card
  a, answer   reveal the answer and explanation
  s, stats    show pool statistics
  h, help, ?  show this help
  q, quit     leave the game";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Next,
    Answer,
    Stats,
    Help,
    Quit,
    Blank,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let word = line.trim().to_lowercase();
        match word.as_str() {
            "" => Input::Blank,
            "n" | "next" => Input::Next,
            "a" | "answer" => Input::Answer,
            "s" | "stats" => Input::Stats,
            "h" | "help" | "?" => Input::Help,
            "q" | "quit" | "exit" => Input::Quit,
            _ => Input::Unknown(word),
        }
    }
}

async fn draw(pool: &CardPool, session: &mut Session) {
    match pool.take_one(wait_budget(pool, EMPTY_POOL_WAIT)).await {
        Ok(card) => {
            session.show(card);
            if let Some(card) = session.current() {
                println!("\nCard #{}: {}", session.shown(), card.question);
            }
        }
        Err(e) => {
            tracing::debug!("draw failed: {e}");
            println!("{}", exhausted_message(&e));
        }
    }
}

fn print_stats(pool: &CardPool) {
    let stats = pool.stats();
    println!(
        "buffered {}/{}, in flight {}, produced {}, served {}, invalid {}, cycles {} ok / {} failed, retries {}",
        pool.len(),
        pool.config().target_size,
        pool.in_flight(),
        stats.cards_produced,
        stats.cards_served,
        stats.invalid_candidates,
        stats.successful_cycles,
        stats.failed_cycles,
        stats.retries,
    );
    if !pool.health().is_available() {
        println!("source unavailable: {:?}", pool.health());
    }
}

pub async fn run(pool: &CardPool) -> Result<()> {
    println!("Number cards: guess the number, closest answer wins.");
    println!("{HELP}");

    let mut session = Session::default();
    draw(pool, &mut session).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("failed to flush stdout")?;

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            println!();
            break;
        };

        match Input::parse(&line) {
            Input::Next => draw(pool, &mut session).await,
            Input::Answer => match session.reveal() {
                Reveal::Revealed(card) => {
                    println!("Answer: {}", card.answer_display());
                    println!("Why: {}", card.explanation);
                }
                Reveal::AlreadyRevealed => println!("Already revealed. Type n for the next card."),
                Reveal::NoCard => println!("No card yet. Type n to draw one."),
            },
            Input::Stats => print_stats(pool),
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Blank => {}
            Input::Unknown(word) => println!("Unknown command '{word}'. Type h for help."),
        }
    }

    println!("Thanks for playing! {} card(s) shown.", session.shown());
    Ok(())
}
