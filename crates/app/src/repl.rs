use crate::render::source_label;
use pdf_chat_core::{ChainFactory, Session, SessionError};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Ask(String),
    Clear,
    Sources,
    Quit,
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => ReplCommand::Empty,
            "/quit" | "/exit" => ReplCommand::Quit,
            "/clear" => ReplCommand::Clear,
            "/sources" => ReplCommand::Sources,
            question => ReplCommand::Ask(question.to_string()),
        }
    }
}

fn print_last_sources(session: &Session, preview_chars: usize) {
    let Some(turn) = session.display_history().last() else {
        println!("no answers yet");
        return;
    };
    if turn.sources.is_empty() {
        println!("no sources for the last answer");
        return;
    }
    for (position, chunk) in turn.sources.iter().enumerate() {
        println!("[{}]\n{}\n", source_label(position, chunk), chunk.preview(preview_chars));
    }
}

pub async fn run(factory: &ChainFactory, pdf: &Path) -> anyhow::Result<()> {
    let mut session = Session::new();
    println!("Indexing your document...");
    let chunks = session
        .process_path(factory, pdf)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    println!(
        "✅ Ready! {chunks} chunks indexed. Ask anything about {}. Commands: /sources /clear /quit",
        pdf.display()
    );

    let preview_chars = factory.config().source_preview_chars;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            ReplCommand::Clear => {
                session.clear();
                println!("chat cleared");
            }
            ReplCommand::Sources => print_last_sources(&session, preview_chars),
            ReplCommand::Ask(question) => match session.ask(&question).await {
                Ok(answer) => println!("{}\n", answer.answer),
                Err(SessionError::EmptyQuestion) => {}
                Err(error) => eprintln!("error: {error}"),
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ReplCommand;

    #[test]
    fn commands_are_recognized() {
        assert_eq!(ReplCommand::parse("  /quit "), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("/exit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("/clear"), ReplCommand::Clear);
        assert_eq!(ReplCommand::parse("/sources"), ReplCommand::Sources);
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
    }

    #[test]
    fn anything_else_is_a_question() {
        assert_eq!(
            ReplCommand::parse(" what is it? "),
            ReplCommand::Ask("what is it?".to_string())
        );
    }
}
