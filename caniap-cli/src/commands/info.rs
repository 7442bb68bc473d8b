//! Image info and port listing command implementations.

use {
    crate::{Cli, commands::flash::load_image, config::Config, serial::describe_port},
    anyhow::Result,
    caniap::{FirmwareImage, NativePortEnumerator, PortEnumerator},
    console::style,
    std::path::Path,
};

fn image_json(image: &FirmwareImage) -> Result<serde_json::Value> {
    let pages = image
        .pages()
        .map(|span| {
            Ok(serde_json::json!({
                "page": span.number(),
                "first_frame": span.first_frame,
                "frame_count": span.frame_count,
                "crc": image.page_crc(span)?,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(serde_json::json!({
        "ok": true,
        "data": {
            "summary": image.summary(),
            "pages": pages,
        }
    }))
}

/// Show how an image will be split into frames and pages.
pub(crate) fn cmd_info(
    cli: &Cli,
    config: &Config,
    image_path: &Path,
    json: bool,
    pad: bool,
) -> Result<()> {
    let image = load_image(image_path, pad || config.transfer.pad)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&image_json(&image)?)?);
        return Ok(());
    }

    let summary = image.summary();
    eprintln!(
        "{} {}",
        style("Firmware image:").bold().underlined(),
        image_path.display()
    );
    eprintln!("  Size:    {} bytes", style(summary.len).cyan());
    if summary.padding > 0 {
        eprintln!("  Padding: {} zero bytes", style(summary.padding).yellow());
    }
    eprintln!("  Frames:  {}", style(summary.frames).cyan());
    eprintln!(
        "  Pages:   {} (last page {} frames)",
        style(summary.pages).cyan(),
        summary.final_page_frames
    );

    if cli.verbose > 0 {
        eprintln!();
        eprintln!("{}", style("Pages:").bold());
        for span in image.pages() {
            eprintln!(
                "  [{}] frames {:>6}..{:<6} CRC {:#06X}",
                span.number(),
                span.first_frame,
                span.end_frame(),
                image.page_crc(span)?
            );
        }
    }

    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "adapter": p.adapter_name(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for port in &ports {
            eprintln!("  {}", describe_port(port));
        }
    }

    Ok(())
}
