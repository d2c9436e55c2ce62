use boreal_core::options::ReductionConfig;
use boreal_core::pipeline::IntegrationSummary;
use boreal_core::simulate::SimulationSpec;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    task: Style,
    dropped: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            task: Style::new().green(),
            dropped: Style::new().dim().yellow(),
        }
    }
}

pub fn print_run_summary(config: &ReductionConfig, spec: &SimulationSpec, threads: usize) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Boreal Reduction"));
    println!("  {}", s.title.apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}"));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Scans"),
        s.value.apply_to(spec.scans)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Integrations"),
        s.value.apply_to(format!("{} per scan", spec.integrations))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Channels"),
        s.value.apply_to(spec.channels)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(spec.frames)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Threads"),
        s.value.apply_to(threads)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Rounds"),
        s.value.apply_to(config.rounds)
    );
    println!();

    println!("  {}", s.header.apply_to("Tasks"));
    for task in &config.tasks {
        println!("    {}", s.task.apply_to(task));
    }
    println!();
}

pub fn print_results(summaries: &[IntegrationSummary]) {
    let s = Styles::new();

    println!("  {}", s.header.apply_to("Results"));
    println!(
        "    {:<10} {:>4} {:>9} {:>8} {:>12}  {}",
        "Scan", "Int", "Channels", "Frames", "Residual", "Trail"
    );
    for summary in summaries {
        if summary.retired {
            println!(
                "    {:<10} {:>4} {}",
                summary.scan_id,
                summary.integration,
                s.dropped.apply_to(&summary.comments)
            );
            continue;
        }
        println!(
            "    {:<10} {:>4} {:>9} {:>8} {:>12.4}  {}",
            summary.scan_id,
            summary.integration,
            summary.valid_channels,
            summary.valid_frames,
            summary.residual_rms,
            summary.comments
        );
    }
}
