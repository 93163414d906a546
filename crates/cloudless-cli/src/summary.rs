use cloudless_core::pipeline::config::{CompositeConfig, CompositeMethod};
use cloudless_core::worker::CompositeOutput;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_composite_summary(config: &CompositeConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Cloudless Composite"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(19)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Input"),
        s.path.apply_to(config.input.display())
    );
    match &config.output {
        Some(output) => println!(
            "  {:<14}{}",
            s.label.apply_to("Output"),
            s.path.apply_to(output.display())
        ),
        None => println!(
            "  {:<14}{}",
            s.label.apply_to("Output"),
            s.disabled.apply_to("<input>/result")
        ),
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Resolution"),
        s.value.apply_to(config.resolution)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Level"),
        s.value.apply_to(config.granule_type)
    );
    if config.output_bands.is_empty() {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Bands"),
            s.disabled.apply_to("resolution defaults")
        );
    } else {
        let bands: Vec<String> = config.output_bands.iter().map(ToString::to_string).collect();
        println!(
            "  {:<14}{}",
            s.label.apply_to("Bands"),
            s.value.apply_to(bands.join(", "))
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Method"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Kind"),
        s.method.apply_to(config.method.name())
    );
    match config.method {
        CompositeMethod::NdviPerPixel { batch_size }
        | CompositeMethod::CloudProbabilityPerPixel { batch_size } => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Batch"),
                s.value.apply_to(format!("{batch_size} granules"))
            );
        }
        CompositeMethod::MedianPerPixel { block_size } => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Block"),
                s.value.apply_to(format!("{block_size} px"))
            );
        }
        CompositeMethod::PerTile { detector } => {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Detector"),
                s.value.apply_to(format!("{detector:?}"))
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Slices"),
                s.value.apply_to(format!("{0}x{0}", config.slice_index))
            );
        }
    }
    println!();

    if let Some(crs) = &config.target_crs {
        println!("  {:<14}{}", s.label.apply_to("Reproject"), s.value.apply_to(crs));
    }
    match &config.footprint {
        Some(fp) => println!(
            "  {:<14}{}",
            s.label.apply_to("Footprint"),
            s.value.apply_to(format!("{} vertices", fp.vertices().len()))
        ),
        None => println!(
            "  {:<14}{}",
            s.label.apply_to("Footprint"),
            s.disabled.apply_to("full tile")
        ),
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Quicklook"),
        if config.quicklook {
            s.value.apply_to("yes")
        } else {
            s.disabled.apply_to("no")
        }
    );
    println!();
}

pub fn print_output(output: &CompositeOutput) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Written"));
    for file in &output.files {
        println!("    {}", s.path.apply_to(file.display()));
    }
    println!();
}
