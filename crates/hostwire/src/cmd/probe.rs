use std::sync::mpsc;
use std::time::{Duration, Instant};

use hostwire_channel::{
    create_endpoint, ChannelError, CommunicationChannel, ConnectionRole, EndpointConfig,
    MessageHandler,
};
use hostwire_protocol::object_model::TestMessagePayload;
use hostwire_protocol::{message_type, DataSerializer, JsonDataSerializer, Message, MessageKind};
use hostwire_transport::EndpointAddress;
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::ProbeArgs;
use crate::exit::{
    channel_error, protocol_error, transport_error, CliError, CliResult, FAILURE, SUCCESS,
    TIMEOUT, USAGE,
};
use crate::output::{print_json, print_pretty, print_table, OutputFormat};

/// Extra time allowed for the connect thread to report after its own timeout.
const CONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct ProbeOutput {
    address: String,
    transport: &'static str,
    requested_version: u32,
    negotiated_version: u32,
    handshake_ms: f64,
    notices: Vec<String>,
}

/// Inbound side of the probe connection; `None` marks a disconnect.
struct Replies(mpsc::Sender<Option<String>>);

impl MessageHandler for Replies {
    fn on_message(&mut self, message: String) {
        let _ = self.0.send(Some(message));
    }

    fn on_disconnected(&mut self, error: Option<ChannelError>) {
        if let Some(err) = error {
            debug!(error = %err, "probe connection failed");
        }
        let _ = self.0.send(None);
    }
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let transport = EndpointAddress::parse(&args.address)
        .map_err(|err| transport_error("invalid address", err))?
        .transport_name();

    let endpoint = create_endpoint(
        ConnectionRole::Client,
        EndpointConfig {
            connect_timeout: timeout,
            ..EndpointConfig::default()
        },
    );
    let (connected_tx, connected_rx) = mpsc::channel();
    let address = endpoint
        .start(
            &args.address,
            Box::new(move |result| {
                let _ = connected_tx.send(result);
            }),
        )
        .map_err(|err| channel_error("connect failed", err))?;

    let started = Instant::now();
    let channel = match connected_rx.recv_timeout(timeout + CONNECT_GRACE) {
        Ok(result) => result.map_err(|err| channel_error("connect failed", err))?,
        Err(_) => {
            endpoint.stop();
            return Err(CliError::new(
                TIMEOUT,
                format!("connect timed out after {timeout:?}"),
            ));
        }
    };
    info!(%address, "connected to test host");

    let outcome = handshake(channel.as_ref(), args.version, timeout);
    endpoint.stop();
    let (negotiated_version, notices) = outcome?;

    let out = ProbeOutput {
        address,
        transport,
        requested_version: args.version,
        negotiated_version,
        handshake_ms: (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        notices,
    };
    print_probe(&out, format);
    Ok(SUCCESS)
}

/// Offer `version`, wait for the reply, then end the session.
fn handshake(
    channel: &dyn CommunicationChannel,
    version: u32,
    timeout: Duration,
) -> CliResult<(u32, Vec<String>)> {
    let serializer = JsonDataSerializer;
    let (tx, rx) = mpsc::channel();
    channel
        .set_message_handler(Box::new(Replies(tx)))
        .map_err(|err| channel_error("probe", err))?;

    let offer = Message::with_payload(message_type::VERSION_CHECK, &version, 0)
        .and_then(|message| serializer.serialize_message(&message))
        .map_err(|err| protocol_error("encode version check", err))?;
    channel
        .send(&offer)
        .map_err(|err| channel_error("send version check", err))?;

    let deadline = Instant::now() + timeout;
    let mut notices = Vec::new();
    let negotiated = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let raw = match rx.recv_timeout(remaining) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return Err(CliError::new(
                    FAILURE,
                    "test host closed the connection during the handshake",
                ))
            }
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no version reply within {timeout:?}"),
                ))
            }
        };

        let message = serializer
            .deserialize_message(&raw)
            .map_err(|err| protocol_error("decode reply", err))?;
        match MessageKind::decode(&message) {
            Ok(MessageKind::VersionCheck(reply)) => break reply,
            _ if message.message_type() == message_type::TEST_MESSAGE => {
                if let Ok(notice) = message.payload_as::<TestMessagePayload>() {
                    notices.push(notice.message);
                }
            }
            _ => debug!(message_type = message.message_type(), "ignoring message during probe"),
        }
    };

    // Diagnostics notices trail the version reply; give them a moment.
    while let Ok(Some(raw)) = rx.recv_timeout(Duration::from_millis(50)) {
        let Ok(message) = serializer.deserialize_message(&raw) else {
            continue;
        };
        if message.message_type() == message_type::TEST_MESSAGE {
            if let Ok(notice) = message.payload_as::<TestMessagePayload>() {
                notices.push(notice.message);
            }
        }
    }

    let end = serializer
        .serialize_message(&Message::new(message_type::SESSION_END, negotiated))
        .map_err(|err| protocol_error("encode session end", err))?;
    channel
        .send(&end)
        .map_err(|err| channel_error("send session end", err))?;
    channel.close();
    Ok((negotiated, notices))
}

fn print_probe(out: &ProbeOutput, format: OutputFormat) {
    let rows = [
        ("Address", out.address.clone()),
        ("Transport", out.transport.to_string()),
        ("Requested", out.requested_version.to_string()),
        ("Negotiated", out.negotiated_version.to_string()),
        ("Handshake", format!("{:.2}ms", out.handshake_ms)),
        ("Notices", out.notices.join("; ")),
    ];
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(&rows),
        OutputFormat::Pretty => print_pretty("Test host", &rows),
        OutputFormat::Raw => println!("{}", out.negotiated_version),
    }
}

pub(crate) fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout(" ").unwrap_err().code, USAGE);
    }
}
