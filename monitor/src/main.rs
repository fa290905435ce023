use std::error::Error;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use clap::Parser;
use keybridge::framework::logging::init_logger_with_filter;
use keybridge::framework::util::HashMap;
use keybridge::prelude::*;
use keybridge::ternary;

/// Opens bridge resources and prints whatever they deliver.
#[derive(Debug, Parser)]
#[command(name = "keybridge-monitor", version)]
struct Args {
    /// Config file; defaults to the platform config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// List MIDI devices and exit.
    #[arg(long)]
    list: bool,

    /// MIDI input index to open. Repeatable.
    #[arg(long = "midi", value_name = "INDEX")]
    midi: Vec<usize>,

    /// WebSocket port as HANDLE=URL. Repeatable.
    #[arg(long = "ws", value_name = "HANDLE=URL")]
    websockets: Vec<String>,

    /// Pub/sub peer, e.g. osc://127.0.0.1:2347.
    #[arg(long)]
    pubsub: Option<String>,

    /// Extra subscription as HANDLE=SUBJECT. Repeatable.
    #[arg(long = "subscribe", value_name = "HANDLE=SUBJECT")]
    subscriptions: Vec<String>,

    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,

    #[arg(long, default_value_t = 10)]
    tick_ms: u64,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,
}

fn main() {
    let args = Args::parse();

    if let Err(err) = run(args) {
        eprintln!("keybridge-monitor failed: {}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::load_or_default()?,
    };
    init_logger_with_filter(config.log_filter());

    let bridge = Bridge::native(config)?;

    if args.list {
        let devices = bridge.midi_devices()?;
        print_devices("inputs", &devices.inputs);
        print_devices("outputs", &devices.outputs);
        return Ok(());
    }

    let (notifier, notifications) = Notifier::channel();
    bridge.attach_notifier(notifier);

    let mut midi_handles = Vec::new();
    for index in &args.midi {
        midi_handles.push(bridge.open_midi_input(*index)?);
    }

    let mut ports = Vec::new();
    for spec in &args.websockets {
        let (handle, url) = parse_pair(spec)?;
        bridge.connect_websocket(handle, url)?;
        ports.push(handle);
    }

    if let Some(url) = &args.pubsub {
        bridge.connect_pubsub(url)?;
    }

    let mut subscriptions = Vec::new();
    for spec in &args.subscriptions {
        let (handle, subject) = parse_pair(spec)?;
        bridge.subscribe(handle, subject)?;
        subscriptions.push(handle);
    }

    info!("Monitoring; press Ctrl-C to stop");

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut counts: HashMap<&'static str, usize> = HashMap::default();

    loop {
        match notifications.recv_timeout(tick) {
            Ok(Notification::Event(_)) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Notification::PortState { port, state }) => {
                println!("# port {} {}", port, state);
            }
            Ok(Notification::PubSubState(state)) => {
                println!("# pubsub {}", state);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let mut events = Vec::new();
        let polled = midi_handles
            .iter()
            .map(|handle| (ResourceKind::MidiInput, *handle))
            .chain(ports.iter().map(|handle| (ResourceKind::WebSocket, *handle)))
            .chain(
                subscriptions
                    .iter()
                    .map(|handle| (ResourceKind::Subscription, *handle)),
            );
        for (kind, handle) in polled {
            events.extend(drain(|| bridge.poll(kind, handle)));
        }
        events.extend(drain(|| bridge.poll_pubsub()));

        for event in events {
            *counts.entry(event.label()).or_default() += 1;
            print_event(&event, args.json)?;
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
    }

    for (label, count) in &counts {
        let noun = ternary!(*count == 1, "event", "events");
        println!("# {} {} {}", count, label, noun);
    }

    Ok(())
}

fn drain(mut poll: impl FnMut() -> Option<InboundEvent>) -> Vec<InboundEvent> {
    std::iter::from_fn(|| poll()).collect()
}

fn parse_pair(spec: &str) -> Result<(Handle, &str), Box<dyn Error>> {
    let (handle, value) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected HANDLE=VALUE, got {:?}", spec))?;
    let handle = handle
        .trim()
        .parse::<Handle>()
        .map_err(|err| format!("bad handle in {:?}: {}", spec, err))?;
    Ok((handle, value.trim()))
}

fn print_devices(label: &str, names: &[String]) {
    println!("MIDI {}:", label);
    if names.is_empty() {
        println!("  (none)");
    }
    for (index, name) in names.iter().enumerate() {
        println!("  {}: {}", index, name);
    }
}

fn print_event(event: &InboundEvent, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        InboundEvent::Midi(message) => println!(
            "midi {} {:02x} {} {}",
            message.device, message.status, message.data1, message.data2
        ),
        InboundEvent::SocketFrame { port, bytes } => {
            match std::str::from_utf8(bytes) {
                Ok(text) => println!("ws {} {:?}", port, text),
                Err(_) => println!("ws {} {} bytes", port, bytes.len()),
            }
        }
        InboundEvent::PubSub(message) => {
            println!("pubsub {} {:?}", message.subject, message.payload)
        }
        other => println!("{:?}", other),
    }

    Ok(())
}
