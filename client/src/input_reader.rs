//! Turns stdin lines into client commands.

use tokio::io::{self, Stdin};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_stream::StreamExt; // provides combinator methods like next on to of FramedRead buf read and Stream trait

use tracing::{info, debug};

const LINES_MAX_LEN: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Say(String),
    Photo(Option<String>),
    Quit,
    Noop,
}

pub struct InputReader {
    fr: FramedRead<Stdin, LinesCodec>,
}

impl InputReader {
    pub fn new() -> Self {
        Self {
            fr: FramedRead::new(io::stdin(), LinesCodec::new_with_max_length(LINES_MAX_LEN)),
        }
    }

    // None once stdin is closed
    pub async fn read(&mut self) -> Option<Input> {
        loop {
            match self.fr.next().await? {
                Ok(line) => return Some(parse_input(Some(line))),
                Err(e) => {
                    // overlong line, skip it and keep reading
                    debug!("discarding input line: {}", e);
                    continue
                },
            }
        }
    }
}

impl Default for InputReader {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_input(line: Option<String>) -> Input {
    let Some(line) = line else { return Input::Noop };

    match line.trim_end() {
        "\\quit" => {
            info!("Session terminated by user...");
            Input::Quit
        },
        "\\photo" => Input::Photo(None),
        value if value.starts_with("\\photo ") => {
            let photo = value["\\photo ".len()..].trim();
            Input::Photo(Some(photo.to_owned()).filter(|p| !p.is_empty()))
        },
        "" => Input::Noop,
        value => Input::Say(value.to_owned()),
    }
}
