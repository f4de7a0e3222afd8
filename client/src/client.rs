use tokio::io::AsyncWriteExt;
use tokio::net::{tcp, TcpStream};
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_stream::StreamExt; // provides combinator methods like next on to of FramedRead buf read and Stream trait
use futures::SinkExt; // provides combinator methods like send/send_all on top of FramedWrite buf write and Sink trait

use thiserror::Error;
use tracing::{info, debug, error};
use uuid::Uuid;

use protocol::{ChatCodec, ChatMessage, ProtocolError};

use crate::config::ClientConfig;
use crate::input_reader::{Input, InputReader};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unable to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct Client {
    sender_id: String,
    name: String,
    photo: Option<String>,
    fr: Option<FramedRead<tcp::OwnedReadHalf, ChatCodec>>,
    fw: FramedWrite<tcp::OwnedWriteHalf, ChatCodec>,
}

impl Client {
    pub fn new(stream: TcpStream, name: String, photo: Option<String>) -> Self {
        // split tcpstream so we can hand off to r & w tasks
        let (client_read, client_write) = stream.into_split();

        Client {
            sender_id: Uuid::new_v4().to_string(),
            name,
            photo: photo.filter(|p| !p.is_empty()),
            fr: Some(FramedRead::new(client_read, ChatCodec::default())),
            fw: FramedWrite::new(client_write, ChatCodec::default()),
        }
    }

    pub async fn setup(config: &ClientConfig) -> Result<Client, ClientError> {
        info!("Client starting, connecting to server {:?}", &config.server);

        let stream = TcpStream::connect(&config.server).await
            .map_err(|source| ClientError::Connect { addr: config.server.clone(), source })?;

        Ok(Client::new(stream, config.name.clone(), config.photo.clone()))
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn message(&self, text: impl Into<String>) -> ChatMessage {
        ChatMessage::new(self.sender_id.as_str(), self.name.as_str(), text, self.photo.clone())
    }

    // no handshake, the joined event is just the first message
    pub async fn register(&mut self) -> Result<(), ClientError> {
        let joined = ChatMessage::joined(self.sender_id.as_str(), self.name.as_str(), self.photo.clone());
        self.fw.send(joined).await?;
        Ok(())
    }

    pub async fn say(&mut self, text: String) -> Result<(), ClientError> {
        let msg = self.message(text);
        self.fw.send(msg).await?;
        Ok(())
    }

    /// Send the left event and half-close; the server then closes its side.
    pub async fn leave(&mut self) -> Result<(), ClientError> {
        let left = ChatMessage::left(self.sender_id.as_str(), self.name.as_str(), self.photo.clone());
        self.fw.send(left).await?;
        self.fw.get_mut().shutdown().await?;
        Ok(())
    }

    pub async fn run(mut self, mut input: InputReader) -> Result<(), ClientError> {
        self.register().await?;
        let mut server_read = self.spawn_read();

        loop {
            select! {
                line = input.read() => {
                    match line {
                        Some(Input::Say(text)) => self.say(text).await?,
                        Some(Input::Photo(photo)) => {
                            info!("photo reference now {:?}", photo);
                            self.photo = photo;
                        },
                        Some(Input::Noop) => continue,
                        Some(Input::Quit) | None => {
                            self.leave().await?;
                            break;
                        },
                    }
                }
                _ = &mut server_read => {
                    info!("Server Remote has closed");
                    return Ok(())
                }
            }
        }

        // let the server finish delivering and close its side
        if let Err(e) = server_read.await {
            debug!("server read task ended abnormally: {:?}", e);
        }
        Ok(())
    }

    // Spawn client tcp read tokio task, to read back server msgs
    fn spawn_read(&mut self) -> JoinHandle<()> {
        let fr = self.fr.take();

        tokio::spawn(async move {
            let Some(mut fr) = fr else { return };

            while let Some(value) = fr.next().await {
                match value {
                    Ok(msg) => println!("{}", format_message(&msg)),
                    Err(e) => {
                        error!("Client Connection closing error: {}", e);
                        break;
                    },
                }
            }
        })
    }
}

pub fn format_message(msg: &ChatMessage) -> String {
    if msg.is_presence() {
        return format!("* {} {}", msg.display_name(), msg.text())
    }

    match msg.photo_reference() {
        Some(photo) => format!("{} -> {} [{}]", msg.display_name(), msg.text(), photo),
        None => format!("{} -> {}", msg.display_name(), msg.text()),
    }
}
