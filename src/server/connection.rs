//! Per-connection RTMP session
//!
//! Owns the socket for one peer from handshake to teardown. A connection
//! is either a publisher (camera pushing media into the registry) or a
//! player (receiving the fan-out), decided by the first publish/play
//! command after connect.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::amf::{amf0, AmfValue};
use crate::error::{Error, Result};
use crate::media::MediaFrame;
use crate::protocol::constants::*;
use crate::protocol::message::{
    encode_peer_bandwidth, encode_u32, encode_user_control, Command, Message, UserControlEvent,
};
use crate::protocol::{ChunkDemuxer, ChunkMuxer, ServerHandshake};
use crate::registry::{RegistryError, StreamEvent, StreamKey, StreamRegistry, Subscription};
use crate::server::config::ServerConfig;
use crate::session::SessionPhase;

/// Message stream id handed out by createStream
const STREAM_ID: u32 = 1;

enum Activity {
    /// An event arrived on the play subscription (None = queue torn down)
    Event(Option<StreamEvent>),
    /// Bytes read from the socket (0 = peer closed)
    Read(usize),
    /// Keepalive timer fired
    Ping,
}

/// One RTMP connection
///
/// Generic over the transport so tests can drive it through an in-memory
/// duplex pipe.
pub struct Connection<S> {
    session_id: u64,
    socket: S,
    peer: String,
    config: ServerConfig,
    registry: Arc<StreamRegistry>,

    demuxer: ChunkDemuxer,
    muxer: ChunkMuxer,
    read_buf: BytesMut,

    phase: SessionPhase,
    app: String,
    publishing: Option<StreamKey>,
    playing: Option<StreamKey>,
    subscription: Option<Subscription>,

    bytes_received: u64,
    last_ack: u64,
    last_activity: Instant,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(
        session_id: u64,
        socket: S,
        peer: String,
        config: ServerConfig,
        registry: Arc<StreamRegistry>,
    ) -> Self {
        let read_buf = BytesMut::with_capacity(config.read_buffer_size);
        Self {
            session_id,
            socket,
            peer,
            config,
            registry,
            demuxer: ChunkDemuxer::new(),
            muxer: ChunkMuxer::new(),
            read_buf,
            phase: SessionPhase::AwaitingHandshake,
            app: String::new(),
            publishing: None,
            playing: None,
            subscription: None,
            bytes_received: 0,
            last_ack: 0,
            last_activity: Instant::now(),
        }
    }

    /// Drive the session to completion. Registry state is released on any
    /// exit path, normal or error.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;
        self.cleanup().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        tokio::time::timeout(self.config.connection_timeout, self.handshake())
            .await
            .map_err(|_| Error::Timeout)??;
        self.phase = SessionPhase::AwaitingConnect;

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.reset();

        loop {
            while let Some(raw) = self.demuxer.decode(&mut self.read_buf)? {
                let msg = Message::from_raw(raw)?;
                self.handle_message(msg).await?;
            }
            if self.phase.is_closed() {
                return Ok(());
            }
            self.maybe_ack().await?;

            let activity = {
                let subscription = self.subscription.as_mut();
                let socket = &mut self.socket;
                let buf = &mut self.read_buf;
                tokio::select! {
                    biased;
                    event = recv_event(subscription) => Activity::Event(event),
                    res = socket.read_buf(buf) => Activity::Read(res?),
                    _ = ping.tick() => Activity::Ping,
                }
            };

            match activity {
                Activity::Read(0) => {
                    tracing::debug!(session_id = self.session_id, peer = %self.peer, "peer closed");
                    return Ok(());
                }
                Activity::Read(n) => {
                    self.bytes_received += n as u64;
                    self.last_activity = Instant::now();
                }
                Activity::Event(Some(StreamEvent::Frame(frame))) => {
                    self.send_frame(&frame).await?;
                }
                Activity::Event(Some(StreamEvent::PublisherEnded)) => {
                    self.on_publisher_ended().await?;
                    return Ok(());
                }
                Activity::Event(None) => {
                    // The registry detached us without a PublisherEnded:
                    // our queue overflowed and we were dropped.
                    tracing::warn!(
                        session_id = self.session_id,
                        peer = %self.peer,
                        "subscriber dropped for backpressure"
                    );
                    return Err(Error::Backpressure);
                }
                Activity::Ping => {
                    if self.last_activity.elapsed() >= self.config.ping_timeout {
                        tracing::warn!(session_id = self.session_id, peer = %self.peer, "idle timeout");
                        return Err(Error::Timeout);
                    }
                    let elapsed = self.last_activity.elapsed().as_millis() as u32;
                    self.send_control(
                        MSG_USER_CONTROL,
                        &encode_user_control(&UserControlEvent::PingRequest(elapsed)),
                    )
                    .await?;
                }
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let mut hs = ServerHandshake::new();
        loop {
            if let Some(response) = hs.process(&mut self.read_buf)? {
                self.socket.write_all(&response).await?;
            }
            if hs.is_done() {
                tracing::debug!(session_id = self.session_id, peer = %self.peer, "handshake complete");
                return Ok(());
            }
            let n = self.socket.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.bytes_received += n as u64;
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        match msg {
            // Applied inside the demuxer; nothing more to do
            Message::SetChunkSize(size) => {
                tracing::debug!(session_id = self.session_id, size, "peer chunk size");
                Ok(())
            }
            Message::Abort(_) | Message::Ack(_) | Message::SetPeerBandwidth { .. } => Ok(()),
            Message::WindowAckSize(size) => {
                tracing::debug!(session_id = self.session_id, size, "peer ack window");
                Ok(())
            }
            Message::UserControl(UserControlEvent::PingRequest(ts)) => {
                self.send_control(
                    MSG_USER_CONTROL,
                    &encode_user_control(&UserControlEvent::PingResponse(ts)),
                )
                .await
            }
            Message::UserControl(_) => Ok(()),
            Message::Command(cmd) => self.handle_command(cmd).await,
            Message::Audio { timestamp, data } => {
                self.publish(MediaFrame::audio(timestamp, data)).await
            }
            Message::Video { timestamp, data } => {
                self.publish(MediaFrame::video(timestamp, data)).await
            }
            Message::Data { timestamp, values } => self.handle_data(timestamp, values).await,
            Message::Unknown { msg_type } => {
                tracing::debug!(session_id = self.session_id, msg_type, "ignoring message");
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        tracing::debug!(
            session_id = self.session_id,
            command = %cmd.name,
            transaction = cmd.transaction_id,
            "command"
        );
        match cmd.name.as_str() {
            CMD_CONNECT => self.on_connect(cmd).await,
            CMD_CREATE_STREAM => self.on_create_stream(cmd).await,
            CMD_PUBLISH => self.on_publish(cmd).await,
            CMD_PLAY => self.on_play(cmd).await,
            CMD_DELETE_STREAM | CMD_CLOSE_STREAM | CMD_FC_UNPUBLISH => self.on_close_stream().await,
            CMD_RELEASE_STREAM | CMD_FC_PUBLISH => {
                self.send_command(
                    &Command::result(cmd.transaction_id, AmfValue::Null, vec![AmfValue::Undefined]),
                    0,
                )
                .await
            }
            CMD_RESULT | CMD_ERROR | CMD_ON_STATUS => Ok(()),
            other => {
                tracing::debug!(session_id = self.session_id, command = other, "ignoring command");
                Ok(())
            }
        }
    }

    async fn on_connect(&mut self, cmd: Command) -> Result<()> {
        if !self.phase.can_connect() {
            return Err(Error::InvalidRequest("connect out of order".into()));
        }

        let app = cmd
            .object
            .get_str("app")
            .unwrap_or("")
            .trim_matches('/')
            .to_string();
        if app.is_empty() {
            let mut info = std::collections::HashMap::new();
            info.insert("level".to_string(), AmfValue::from("error"));
            info.insert("code".to_string(), AmfValue::from(NC_CONNECT_REJECTED));
            info.insert(
                "description".to_string(),
                AmfValue::from("Missing application name."),
            );
            let error = Command {
                name: CMD_ERROR.to_string(),
                transaction_id: cmd.transaction_id,
                object: AmfValue::Null,
                args: vec![AmfValue::Object(info)],
                stream_id: 0,
            };
            self.send_command(&error, 0).await?;
            return Err(Error::InvalidRequest("empty app name".into()));
        }

        self.send_control(MSG_WINDOW_ACK_SIZE, &encode_u32(self.config.window_ack_size))
            .await?;
        self.send_control(
            MSG_SET_PEER_BANDWIDTH,
            &encode_peer_bandwidth(self.config.window_ack_size, 2),
        )
        .await?;
        self.send_control(MSG_SET_CHUNK_SIZE, &encode_u32(self.config.chunk_size))
            .await?;
        self.muxer.set_chunk_size(self.config.chunk_size);

        let mut props = std::collections::HashMap::new();
        props.insert("fmsVer".to_string(), AmfValue::from("FMS/3,0,1,123"));
        props.insert("capabilities".to_string(), AmfValue::from(31.0));

        let mut info = std::collections::HashMap::new();
        info.insert("level".to_string(), AmfValue::from("status"));
        info.insert("code".to_string(), AmfValue::from(NC_CONNECT_SUCCESS));
        info.insert(
            "description".to_string(),
            AmfValue::from("Connection succeeded."),
        );
        info.insert("objectEncoding".to_string(), AmfValue::from(0.0));

        self.send_command(
            &Command::result(
                cmd.transaction_id,
                AmfValue::Object(props),
                vec![AmfValue::Object(info)],
            ),
            0,
        )
        .await?;

        self.app = app;
        self.phase = SessionPhase::AwaitingCommand;
        tracing::info!(session_id = self.session_id, app = %self.app, peer = %self.peer, "connected");
        Ok(())
    }

    async fn on_create_stream(&mut self, cmd: Command) -> Result<()> {
        self.send_command(
            &Command::result(
                cmd.transaction_id,
                AmfValue::Null,
                vec![AmfValue::from(STREAM_ID as f64)],
            ),
            0,
        )
        .await
    }

    async fn on_publish(&mut self, cmd: Command) -> Result<()> {
        if !self.phase.can_start_stream() {
            return Err(Error::InvalidRequest("publish out of order".into()));
        }
        let name = cmd.first_arg_str().unwrap_or("").to_string();
        if name.is_empty() {
            self.send_status("error", NS_PUBLISH_BADNAME, "Missing stream name.")
                .await?;
            return Err(Error::InvalidRequest("empty stream name".into()));
        }

        let key = StreamKey::new(self.app.clone(), name);
        if let Err(e) = self.registry.register_publisher(&key, self.session_id).await {
            match &e {
                RegistryError::StreamKeyInUse(_) => {
                    self.send_status(
                        "error",
                        NS_PUBLISH_BADNAME,
                        "Stream already being published.",
                    )
                    .await?;
                }
                _ => {}
            }
            return Err(e.into());
        }

        self.send_control(
            MSG_USER_CONTROL,
            &encode_user_control(&UserControlEvent::StreamBegin(STREAM_ID)),
        )
        .await?;
        self.send_status("status", NS_PUBLISH_START, "Publishing started.")
            .await?;

        tracing::info!(session_id = self.session_id, stream = %key, "publish start");
        self.publishing = Some(key);
        self.phase = SessionPhase::Publishing;
        Ok(())
    }

    async fn on_play(&mut self, cmd: Command) -> Result<()> {
        if !self.phase.can_start_stream() {
            return Err(Error::InvalidRequest("play out of order".into()));
        }
        let name = cmd.first_arg_str().unwrap_or("").to_string();
        if name.is_empty() {
            return Err(Error::InvalidRequest("empty stream name".into()));
        }

        let key = StreamKey::new(self.app.clone(), name);
        let (subscription, catchup) = match self.registry.subscribe(&key).await {
            Ok(pair) => pair,
            Err(e) => {
                self.send_status("error", NS_PLAY_STREAM_NOT_FOUND, "Stream not found.")
                    .await?;
                return Err(e.into());
            }
        };

        self.send_control(
            MSG_USER_CONTROL,
            &encode_user_control(&UserControlEvent::StreamBegin(STREAM_ID)),
        )
        .await?;
        self.send_status("status", NS_PLAY_RESET, "Resetting stream.")
            .await?;
        self.send_status("status", NS_PLAY_START, "Playing started.")
            .await?;

        // Catch-up burst: metadata, decoder configs, then the buffered GOP
        for frame in &catchup {
            self.send_frame(frame).await?;
        }

        tracing::info!(
            session_id = self.session_id,
            stream = %key,
            catchup_frames = catchup.len(),
            "play start"
        );
        self.playing = Some(key);
        self.subscription = Some(subscription);
        self.phase = SessionPhase::Playing;
        Ok(())
    }

    async fn on_close_stream(&mut self) -> Result<()> {
        if let Some(key) = self.publishing.take() {
            tracing::info!(session_id = self.session_id, stream = %key, "publish stop");
            self.registry.remove_publisher(&key, self.session_id).await;
            self.send_status("status", NS_UNPUBLISH_SUCCESS, "Publishing stopped.")
                .await?;
            self.phase = SessionPhase::AwaitingCommand;
        }
        if let Some(key) = self.playing.take() {
            if let Some(sub) = self.subscription.take() {
                self.registry.unsubscribe(&key, sub.id).await;
            }
            self.phase = SessionPhase::AwaitingCommand;
        }
        Ok(())
    }

    async fn handle_data(&mut self, timestamp: u32, values: Vec<AmfValue>) -> Result<()> {
        if !self.phase.accepts_media() {
            return Ok(());
        }
        // OBS and friends wrap metadata as @setDataFrame("onMetaData", {...});
        // cache the unwrapped form so players get plain onMetaData.
        let inner: &[AmfValue] = match values.first().and_then(|v| v.as_str()) {
            Some("@setDataFrame") => &values[1..],
            Some("onMetaData") => &values[..],
            _ => return Ok(()),
        };
        if inner.is_empty() {
            return Ok(());
        }
        let body = amf0::encode_all(inner);
        self.publish(MediaFrame::metadata(timestamp, body)).await
    }

    async fn publish(&mut self, frame: MediaFrame) -> Result<()> {
        if !self.phase.accepts_media() {
            tracing::debug!(session_id = self.session_id, "media before publish, dropping");
            return Ok(());
        }
        if frame.is_empty() {
            return Ok(());
        }
        // publishing is always Some while the phase is Publishing
        if let Some(key) = &self.publishing {
            self.registry.publish_frame(key, frame).await;
        }
        Ok(())
    }

    async fn on_publisher_ended(&mut self) -> Result<()> {
        tracing::info!(session_id = self.session_id, "publisher ended, closing player");
        self.send_status("status", NS_PLAY_UNPUBLISH_NOTIFY, "Publisher stopped.")
            .await?;
        self.send_control(
            MSG_USER_CONTROL,
            &encode_user_control(&UserControlEvent::StreamEof(STREAM_ID)),
        )
        .await?;
        // The registry entry is already gone; no unsubscribe needed
        self.playing = None;
        self.subscription = None;
        self.phase = SessionPhase::Closed;
        Ok(())
    }

    /// Acknowledge received bytes once a window's worth has arrived
    async fn maybe_ack(&mut self) -> Result<()> {
        if self.bytes_received - self.last_ack >= self.config.window_ack_size as u64 {
            self.last_ack = self.bytes_received;
            self.send_control(MSG_ACK, &encode_u32(self.bytes_received as u32))
                .await?;
        }
        Ok(())
    }

    async fn send_command(&mut self, cmd: &Command, stream_id: u32) -> Result<()> {
        let body = cmd.encode();
        let wire = self
            .muxer
            .encode(CSID_COMMAND, MSG_COMMAND_AMF0, 0, stream_id, &body);
        self.socket.write_all(&wire).await?;
        Ok(())
    }

    async fn send_status(&mut self, level: &str, code: &str, description: &str) -> Result<()> {
        self.send_command(&Command::on_status(level, code, description), STREAM_ID)
            .await
    }

    async fn send_control(&mut self, msg_type: u8, body: &[u8]) -> Result<()> {
        let wire = self.muxer.encode(CSID_PROTOCOL, msg_type, 0, 0, body);
        self.socket.write_all(&wire).await?;
        Ok(())
    }

    async fn send_frame(&mut self, frame: &MediaFrame) -> Result<()> {
        let (csid, msg_type) = match frame.kind {
            crate::media::FrameKind::Audio => (CSID_AUDIO, MSG_AUDIO),
            crate::media::FrameKind::Video => (CSID_VIDEO, MSG_VIDEO),
            crate::media::FrameKind::Metadata => (CSID_DATA, MSG_DATA_AMF0),
        };
        let wire = self
            .muxer
            .encode(csid, msg_type, frame.timestamp, STREAM_ID, &frame.data);
        self.socket.write_all(&wire).await?;
        Ok(())
    }

    async fn cleanup(&mut self) {
        if let Some(key) = self.publishing.take() {
            self.registry.remove_publisher(&key, self.session_id).await;
        }
        if let Some(key) = self.playing.take() {
            if let Some(sub) = self.subscription.take() {
                self.registry.unsubscribe(&key, sub.id).await;
            }
        }
        self.phase = SessionPhase::Closed;
    }
}

async fn recv_event(subscription: Option<&mut Subscription>) -> Option<StreamEvent> {
    match subscription {
        Some(sub) => sub.receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    fn test_config() -> ServerConfig {
        ServerConfig::default().connection_timeout(Duration::from_secs(2))
    }

    fn spawn_connection(
        registry: Arc<StreamRegistry>,
        session_id: u64,
    ) -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let config = test_config();
        let handle = tokio::spawn(async move {
            let mut conn = Connection::new(session_id, server, "test".into(), config, registry);
            conn.run().await
        });
        (client, handle)
    }

    async fn client_handshake(client: &mut DuplexStream) {
        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        c0c1[0] = RTMP_VERSION;
        for (i, b) in c0c1[9..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        client.write_all(&c0c1).await.unwrap();

        let mut response = vec![0u8; 1 + HANDSHAKE_SIZE * 2];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response[0], RTMP_VERSION);

        // C2 echoes S1
        client
            .write_all(&response[1..1 + HANDSHAKE_SIZE])
            .await
            .unwrap();
    }

    async fn send_command(client: &mut DuplexStream, muxer: &mut ChunkMuxer, cmd: &Command) {
        let body = cmd.encode();
        let wire = muxer.encode(CSID_COMMAND, MSG_COMMAND_AMF0, 0, cmd.stream_id, &body);
        client.write_all(&wire).await.unwrap();
    }

    fn connect_command(app: &str) -> Command {
        let mut obj = HashMap::new();
        obj.insert("app".to_string(), AmfValue::from(app));
        Command {
            name: CMD_CONNECT.to_string(),
            transaction_id: 1.0,
            object: AmfValue::Object(obj),
            args: vec![],
            stream_id: 0,
        }
    }

    fn publish_command(name: &str) -> Command {
        Command {
            name: CMD_PUBLISH.to_string(),
            transaction_id: 3.0,
            object: AmfValue::Null,
            args: vec![AmfValue::from(name), AmfValue::from("live")],
            stream_id: STREAM_ID,
        }
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_connect_with_empty_app_closes_connection() {
        let registry = Arc::new(StreamRegistry::new());
        let (mut client, handle) = spawn_connection(registry, 1);

        client_handshake(&mut client).await;
        let mut muxer = ChunkMuxer::new();
        send_command(&mut client, &mut muxer, &connect_command("")).await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_publish_with_empty_name_closes_connection() {
        let registry = Arc::new(StreamRegistry::new());
        let (mut client, handle) = spawn_connection(registry.clone(), 1);

        client_handshake(&mut client).await;
        let mut muxer = ChunkMuxer::new();
        send_command(&mut client, &mut muxer, &connect_command("live")).await;
        send_command(&mut client, &mut muxer, &publish_command("")).await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_registers_and_disconnect_cleans_up() {
        let registry = Arc::new(StreamRegistry::new());
        let (mut client, handle) = spawn_connection(registry.clone(), 1);

        client_handshake(&mut client).await;
        let mut muxer = ChunkMuxer::new();
        send_command(&mut client, &mut muxer, &connect_command("live")).await;
        send_command(&mut client, &mut muxer, &publish_command("cam1")).await;

        let key = StreamKey::new("live", "cam1");
        {
            let registry = registry.clone();
            let key = key.clone();
            wait_for(move || {
                let registry = registry.clone();
                let key = key.clone();
                async move { registry.stream_exists(&key).await }
            })
            .await;
        }

        // Publisher disconnect destroys the stream
        drop(client);
        handle.await.unwrap().unwrap();
        assert!(!registry.stream_exists(&key).await);
    }

    #[tokio::test]
    async fn test_second_publisher_rejected_first_keeps_streaming() {
        let registry = Arc::new(StreamRegistry::new());
        let (mut first, first_handle) = spawn_connection(registry.clone(), 1);

        client_handshake(&mut first).await;
        let mut muxer1 = ChunkMuxer::new();
        send_command(&mut first, &mut muxer1, &connect_command("live")).await;
        send_command(&mut first, &mut muxer1, &publish_command("cam1")).await;

        let key = StreamKey::new("live", "cam1");
        {
            let registry = registry.clone();
            let key = key.clone();
            wait_for(move || {
                let registry = registry.clone();
                let key = key.clone();
                async move { registry.stream_exists(&key).await }
            })
            .await;
        }

        // Second publisher on the same key is refused and disconnected
        let (mut second, second_handle) = spawn_connection(registry.clone(), 2);
        client_handshake(&mut second).await;
        let mut muxer2 = ChunkMuxer::new();
        send_command(&mut second, &mut muxer2, &connect_command("live")).await;
        send_command(&mut second, &mut muxer2, &publish_command("cam1")).await;

        let result = second_handle.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Registry(RegistryError::StreamKeyInUse(_)))
        ));

        // The original stream is untouched by the failed claim
        assert!(registry.stream_exists(&key).await);

        drop(first);
        first_handle.await.unwrap().unwrap();
        assert!(!registry.stream_exists(&key).await);
    }

    #[tokio::test]
    async fn test_play_receives_cached_gop_then_live_frames() {
        use crate::protocol::RawMessage;

        let registry = Arc::new(StreamRegistry::new());
        let key = StreamKey::new("live", "alpha");

        // Publisher pushes a keyframe and two interframes
        let (mut publisher, _pub_handle) = spawn_connection(registry.clone(), 1);
        client_handshake(&mut publisher).await;
        let mut pub_muxer = ChunkMuxer::new();
        send_command(&mut publisher, &mut pub_muxer, &connect_command("live")).await;
        send_command(&mut publisher, &mut pub_muxer, &publish_command("alpha")).await;

        let gop: [(u32, &[u8]); 3] = [
            (0, &[0x17, 0x01, 0xA0]),
            (33, &[0x27, 0x01, 0xA1]),
            (66, &[0x27, 0x01, 0xA2]),
        ];
        for (ts, data) in gop {
            let wire = pub_muxer.encode(CSID_VIDEO, MSG_VIDEO, ts, STREAM_ID, data);
            publisher.write_all(&wire).await.unwrap();
        }
        {
            let registry = registry.clone();
            wait_for(move || {
                let registry = registry.clone();
                async move {
                    registry.snapshot().await.first().map(|s| s.gop_frames) == Some(3)
                }
            })
            .await;
        }

        // Player joins after the GOP is cached
        let (mut player, _play_handle) = spawn_connection(registry.clone(), 2);
        client_handshake(&mut player).await;
        let mut play_muxer = ChunkMuxer::new();
        send_command(&mut player, &mut play_muxer, &connect_command("live")).await;
        let play = Command {
            name: CMD_PLAY.to_string(),
            transaction_id: 4.0,
            object: AmfValue::Null,
            args: vec![AmfValue::from("alpha")],
            stream_id: STREAM_ID,
        };
        send_command(&mut player, &mut play_muxer, &play).await;

        // Once the player is attached, one live frame arrives
        {
            let registry = registry.clone();
            wait_for(move || {
                let registry = registry.clone();
                async move {
                    registry.snapshot().await.first().map(|s| s.subscribers) == Some(1)
                }
            })
            .await;
        }
        let wire = pub_muxer.encode(CSID_VIDEO, MSG_VIDEO, 99, STREAM_ID, &[0x27, 0x01, 0xA3]);
        publisher.write_all(&wire).await.unwrap();

        // Demux everything the server sent to the player; the video
        // messages must be the cached GOP then the live frame, in order.
        let videos = tokio::time::timeout(Duration::from_secs(5), async {
            let mut demuxer = ChunkDemuxer::new();
            let mut buf = BytesMut::new();
            let mut videos: Vec<RawMessage> = Vec::new();
            loop {
                while let Some(raw) = demuxer.decode(&mut buf).unwrap() {
                    if raw.msg_type == MSG_VIDEO {
                        videos.push(raw);
                    }
                }
                if videos.len() >= 4 {
                    break videos;
                }
                let n = player.read_buf(&mut buf).await.unwrap();
                assert!(n > 0, "server closed before delivering frames");
            }
        })
        .await
        .unwrap();

        let timestamps: Vec<u32> = videos.iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![0, 33, 66, 99]);
        assert_eq!(&videos[0].payload[..], &[0x17, 0x01, 0xA0]);
        assert_eq!(&videos[1].payload[..], &[0x27, 0x01, 0xA1]);
        assert_eq!(&videos[2].payload[..], &[0x27, 0x01, 0xA2]);
        assert_eq!(&videos[3].payload[..], &[0x27, 0x01, 0xA3]);

        assert!(registry.stream_exists(&key).await);
    }

    #[tokio::test]
    async fn test_play_unknown_stream_rejected() {
        let registry = Arc::new(StreamRegistry::new());
        let (mut client, handle) = spawn_connection(registry, 1);

        client_handshake(&mut client).await;
        let mut muxer = ChunkMuxer::new();
        send_command(&mut client, &mut muxer, &connect_command("live")).await;
        let play = Command {
            name: CMD_PLAY.to_string(),
            transaction_id: 4.0,
            object: AmfValue::Null,
            args: vec![AmfValue::from("nope")],
            stream_id: STREAM_ID,
        };
        send_command(&mut client, &mut muxer, &play).await;

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Registry(RegistryError::StreamNotFound(_)))
        ));
    }
}
