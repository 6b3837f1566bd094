use delaycam_mirror::MirrorCommand;

/// Parses one line typed while the mirror runs.
///
/// Accepted forms: `delay <secs>`, `zoom <factor>`, `pinch <scale> [x y]`,
/// `pan <dx> <dy>`, `reset`, `quit`.
pub fn parse_command(line: &str) -> Result<MirrorCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = parts.collect();

    match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("delay", [secs]) => Ok(MirrorCommand::SetDelay(number(secs)?)),
        ("zoom", [factor]) => Ok(MirrorCommand::Zoom(number(factor)?)),
        ("pinch", [scale]) => Ok(MirrorCommand::Pinch {
            scale: number(scale)?,
            focus: (0.5, 0.5),
        }),
        ("pinch", [scale, x, y]) => Ok(MirrorCommand::Pinch {
            scale: number(scale)?,
            focus: (number(x)?, number(y)?),
        }),
        ("pan", [dx, dy]) => Ok(MirrorCommand::Pan {
            dx: number(dx)?,
            dy: number(dy)?,
        }),
        ("reset", []) => Ok(MirrorCommand::ResetView),
        ("quit" | "q" | "stop", []) => Ok(MirrorCommand::Stop),
        (other, _) => Err(format!("unrecognised command: {other} {}", args.join(" "))),
    }
}

fn number<T: std::str::FromStr>(raw: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("not a valid number: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_view_and_delay_commands() {
        assert_eq!(parse_command("delay 30"), Ok(MirrorCommand::SetDelay(30)));
        assert_eq!(parse_command("ZOOM 2.5"), Ok(MirrorCommand::Zoom(2.5)));
        assert_eq!(
            parse_command("pan 0.1 -0.2"),
            Ok(MirrorCommand::Pan { dx: 0.1, dy: -0.2 })
        );
        assert_eq!(
            parse_command("pinch 2 0 1"),
            Ok(MirrorCommand::Pinch {
                scale: 2.0,
                focus: (0.0, 1.0)
            })
        );
        assert_eq!(parse_command("  reset "), Ok(MirrorCommand::ResetView));
        assert_eq!(parse_command("q"), Ok(MirrorCommand::Stop));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_command("").is_err());
        assert!(parse_command("delay").is_err());
        assert!(parse_command("delay soon").is_err());
        assert!(parse_command("pan 1").is_err());
        assert!(parse_command("rewind 5").is_err());
    }
}
