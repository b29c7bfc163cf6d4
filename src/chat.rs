//! Console chat loop.
//!
//! A single session lives for the duration of the loop. Queries run through
//! the same [`process_query`](crate::server::process_query) path as the web
//! interface, so the transcript semantics are identical.

use std::io::{Write, stdout};
use std::sync::Arc;

use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};

use crate::server::{AppContext, process_query};

pub async fn run(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let mut stdout = stdout();

    println!(
        "{} ready. Ask a question, or type 'exit' to quit.\n",
        ctx.config.chatbot_name
    );

    let session_id = ctx.registry.create().await;

    loop {
        stdout.execute(SetForegroundColor(Color::Green))?;
        print!("You: ");
        stdout.execute(SetForegroundColor(Color::Reset))?;
        stdout.flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let query = input.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let message = process_query(&ctx, &session_id, query).await?;

        stdout.execute(SetForegroundColor(Color::Blue))?;
        stdout.execute(SetAttribute(Attribute::Bold))?;
        println!("\n{}: {}\n", ctx.config.chatbot_name, message.content);
        stdout.execute(SetAttribute(Attribute::Reset))?;
        stdout.execute(SetForegroundColor(Color::Reset))?;
    }

    println!("Goodbye!");
    Ok(())
}
