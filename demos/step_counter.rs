//! Four-stage arithmetic pipeline driven one step at a time.
//!
//! A counter source in step mode feeds two transform stages and a printing
//! sink, all running continuously. Each keypress advances the source by one
//! item; the value crosses three threads before it is printed.
//!
//! Usage: cargo run --example step_counter
//!        (Press Enter to advance, Ctrl-D to finish early)

use handoff_pipeline::{
    FnSink, FnSource, FnTransform, Mode, OpStatus, Pipeline, SinkStage, SourceStage, Transform,
    TransformStage,
};
use std::io::BufRead;

fn scale(name: &'static str, factor: f64) -> impl Transform<i64, f64> {
    FnTransform::new(name, move |input: &mut i64, output: &mut f64| {
        *output = *input as f64 * factor;
        OpStatus::Running
    })
}

fn offset(name: &'static str, addend: f64) -> impl Transform<f64, f64> {
    FnTransform::new(name, move |input: &mut f64, output: &mut f64| {
        *output = *input + addend;
        OpStatus::Running
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut counter = 0i64;
    let mut source = SourceStage::<i64>::new("counter");
    source.add_operator(FnSource::new("count", move |output: &mut i64| {
        *output = counter;
        counter += 1;
        if counter <= 20 {
            OpStatus::Running
        } else {
            OpStatus::Complete
        }
    }));

    let mut exec1 = TransformStage::<i64, f64>::new("exec_1");
    exec1.add_operator(scale("multiply_3.1", 3.1).then(offset("add_5", 5.0)));

    let mut exec2 = TransformStage::<f64, f64>::new("exec_2");
    exec2.add_operator(offset("subtract_1", -1.0));

    let mut sink = SinkStage::<f64>::new("printer");
    sink.add_operator(FnSink::new("print", |value: &mut f64| {
        println!(">> {value:.2}");
        OpStatus::Running
    }));

    exec1.attach_input_port(source.output_port());
    exec2.attach_input_port(exec1.output_port());
    sink.attach_input_port(exec2.output_port());

    source.send_mode(Mode::Step);
    exec1.send_mode(Mode::Continuous);
    exec2.send_mode(Mode::Continuous);
    sink.send_mode(Mode::Continuous);

    let mut pipeline = Pipeline::new()
        .drain_delay(std::time::Duration::from_millis(200))
        .stage(source)
        .stage(exec1)
        .stage(exec2)
        .stage(sink);
    pipeline.start()?;

    println!("Press Enter to step the source; Ctrl-D to stop.");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        line?;
        pipeline.send_mode(0, Mode::Step)?;
    }

    for (name, cause) in pipeline.shutdown() {
        println!("stage {name} ended: {cause:?}");
    }
    Ok(())
}
