use std::io::Read;

use cpc_frame::{FrameDecoder, FrameMode, DEFAULT_MAX_PAYLOAD};
use cpc_message::{decode_message, Message, Request};
use cpc_peer::negotiated_mode;
use tracing::warn;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{message_record, print_records, request_record, OutputFormat, Record};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let capture = read_capture(&args)?;
    let initial = FrameMode {
        binary_checksum: args.binary_checksum,
        extended_framing: args.extended,
    };

    let decoded = decode_capture(&capture, initial, args.requests);
    print_records(&decoded.records, format);
    if decoded.resyncs > 0 {
        warn!(skipped = decoded.resyncs, "corrupted frames skipped");
    }
    if decoded.trailing > 0 {
        warn!(bytes = decoded.trailing, "capture ends inside a frame");
    }
    match decoded.error {
        Some(err) => Err(frame_error("decode failed", err)),
        None => Ok(SUCCESS),
    }
}

fn read_capture(args: &DecodeArgs) -> CliResult<Vec<u8>> {
    match &args.file {
        Some(path) => std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err)),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|err| io_error("failed reading stdin", err))?;
            Ok(buf)
        }
    }
}

struct Decoded {
    records: Vec<Record>,
    resyncs: u64,
    trailing: usize,
    /// Unrecoverable framing error that stopped decoding.
    error: Option<cpc_frame::FrameError>,
}

/// Decode a whole capture, following capability messages the way a live
/// connection does: the frame after a capability message is read in the
/// negotiated mode.
///
/// A client-side capture only holds the request, so the requested bits are
/// assumed granted.
fn decode_capture(capture: &[u8], initial: FrameMode, requests: bool) -> Decoded {
    let mut decoder = FrameDecoder::with_max_payload(DEFAULT_MAX_PAYLOAD);
    decoder.set_mode(initial);
    decoder.push(capture);

    let mut records = Vec::new();
    let mut error = None;
    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                error = Some(err);
                break;
            }
        };

        if requests {
            match Request::decode(&frame.payload) {
                Ok(request) => {
                    if let Request::Capabilities(capabilities) = &request {
                        decoder.set_mode(negotiated_mode(*capabilities));
                    }
                    records.push(request_record(&request));
                }
                Err(err) => warn!(%err, size = frame.payload.len(), "undecodable request skipped"),
            }
        } else {
            match decode_message(&frame.payload) {
                Ok(message) => {
                    if let Message::Capabilities { capabilities, .. } = &message {
                        decoder.set_mode(negotiated_mode(*capabilities));
                    }
                    records.push(message_record(&message));
                }
                Err(err) => warn!(%err, size = frame.payload.len(), "undecodable message skipped"),
            }
        }
    }

    Decoded {
        records,
        resyncs: decoder.resyncs(),
        trailing: if error.is_some() { 0 } else { decoder.buffered() },
        error,
    }
}
