#![no_main]

use std::{collections::HashMap, sync::Arc};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use emigate::{broker::EnvelopeFilter, Envelope, InboundMessage};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    body: Vec<u8>,
    attributes: HashMap<String, String>,
    types: Option<Vec<String>>,
    correlation_id: Option<String>,
}

fuzz_target!(|input: FuzzInput| {
    let message = InboundMessage::new("fuzz", input.body, input.attributes);

    // Любое тело либо декодируется, либо даёт MalformedMessage, но не панику.
    let Ok(envelope) = Envelope::decode(Arc::from("fuzz-topic"), &message) else {
        return;
    };
    assert_eq!(envelope.message_id, "fuzz");

    let mut filter = EnvelopeFilter::new().topic("fuzz-topic").types(input.types);
    if let Some(id) = input.correlation_id {
        filter = filter.correlation_id(id);
    }
    let _ = filter.matches(&envelope);
});
