#![no_main]

use arbitrary::Arbitrary;
use calltrace::{
    CollectingSink, ErrorSummary, MarkerFlags, NodeFlags, TraceTarget, Tracer, TracerConfig,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
enum Event {
    Begin { trace_id: u32, flags: u32 },
    Enter { class_id: u32, method_id: u32, dt: u16 },
    Exit { dt: u16 },
    Error { class_id: u32, dt: u16, reuse: bool },
    Attr { target: TraceTarget, attr_id: u32, value: i64 },
    MinTraceTime { nanos: u32 },
    TraceFlags { trace_id: Option<u32>, flags: u32 },
    FrameFlags { flags: u32 },
    Toggle,
}

#[derive(Debug, Arbitrary)]
struct Input {
    max_trace_records: u8,
    min_method_time: u16,
    drop_interim: bool,
    events: Vec<Event>,
}

fuzz_target!(|input: Input| {
    // Arbitrary, possibly malformed event streams must never panic
    let config = TracerConfig {
        max_trace_records: usize::from(input.max_trace_records).max(1),
        min_method_time: u64::from(input.min_method_time),
        min_trace_time: 0,
        drop_interim: input.drop_interim,
        ..TracerConfig::default()
    };
    let tracer = Tracer::new(config);
    let sink = Arc::new(CollectingSink::new());
    tracer.add_sink(sink.clone());

    let mut a = tracer.assembler();
    let mut now = 0u64;
    let mut last_error = None;

    for event in input.events {
        match event {
            Event::Begin { trace_id, flags } => {
                a.begin(trace_id, now, MarkerFlags::from_bits_truncate(flags))
            }
            Event::Enter { class_id, method_id, dt } => {
                now += u64::from(dt);
                a.enter(class_id, method_id, 0, now);
            }
            Event::Exit { dt } => {
                now += u64::from(dt);
                a.exit(now);
            }
            Event::Error { class_id, dt, reuse } => {
                now += u64::from(dt);
                let err = match (&last_error, reuse) {
                    (Some(prev), true) => Arc::clone(prev),
                    _ => ErrorSummary::new(class_id, "fuzz").into_ref(),
                };
                last_error = Some(err.clone());
                a.error(err, now);
            }
            Event::Attr { target, attr_id, value } => a.attr(target, attr_id, value),
            Event::MinTraceTime { nanos } => a.set_minimum_trace_time(u64::from(nanos)),
            Event::TraceFlags { trace_id, flags } => {
                a.mark_trace_flags(trace_id, MarkerFlags::from_bits_truncate(flags))
            }
            Event::FrameFlags { flags } => a.mark_frame_flags(NodeFlags::from_bits_truncate(flags)),
            Event::Toggle => {
                if a.is_enabled() {
                    a.disable()
                } else {
                    a.enable()
                }
            }
        }
    }

    for trace in sink.take() {
        let _ = trace.subtree_size();
        let _ = serde_json::to_string(&*trace);
    }
});
