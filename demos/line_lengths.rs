//! Text statistics pipeline over stdin.
//!
//! A source stage reads lines, a transform stage annotates each line with
//! its length and word count, and a sink stage prints the result. The line
//! text travels through both hand-off buffers by cell swap; the `String`
//! allocations are recycled run-long instead of being reallocated per line.
//!
//! Usage: cargo run --example line_lengths
//!        (Then type lines of text and press Ctrl-D to finish)

use handoff_pipeline::{
    FnSink, FnSource, FnTransform, Mode, OpStatus, Pipeline, SinkStage, SourceStage,
    TransformStage,
};
use std::fmt::Write as _;
use std::io::BufRead;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut reader = std::io::BufReader::new(std::io::stdin());
    let mut source = SourceStage::<String>::new("reader");
    source.add_operator(FnSource::new("read_line", move |output: &mut String| {
        output.clear();
        match reader.read_line(output) {
            Ok(0) => OpStatus::Complete,
            Ok(_) => {
                while output.ends_with('\n') || output.ends_with('\r') {
                    output.pop();
                }
                OpStatus::Running
            }
            Err(_) => OpStatus::Error,
        }
    }));

    let mut annotate = TransformStage::<String, String>::new("annotate");
    annotate.add_operator(FnTransform::new(
        "measure",
        |input: &mut String, output: &mut String| {
            output.clear();
            let words = input.split_whitespace().count();
            let _ = write!(output, "{:3} chars, {:2} words | {}", input.len(), words, input);
            OpStatus::Running
        },
    ));

    let mut sink = SinkStage::<String>::new("printer");
    sink.add_operator(FnSink::new("print", |line: &mut String| {
        println!("{line}");
        OpStatus::Running
    }));

    annotate.attach_input_port(source.output_port());
    sink.attach_input_port(annotate.output_port());

    source.send_mode(Mode::Continuous);
    annotate.send_mode(Mode::Continuous);
    sink.send_mode(Mode::Continuous);

    let mut pipeline = Pipeline::new()
        .drain_delay(std::time::Duration::from_millis(200))
        .stage(source)
        .stage(annotate)
        .stage(sink);
    pipeline.start()?;

    pipeline.wait_stage(0)?;
    for (name, cause) in pipeline.shutdown() {
        tracing::info!("stage {name} ended: {cause:?}");
    }
    Ok(())
}
