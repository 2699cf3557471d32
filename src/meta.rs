// src/meta.rs

//! Startup banner and version metadata: a handful of "fields" (banner,
//! build info, a motd) stacked between separator rules, plus a single-line
//! form used both for `--version` and as the ACL writer's metadata comment.

use rand::seq::SliceRandom;

const SEPARATOR: char = '─';

trait Field {
    fn lines(&self) -> Vec<String>;
    fn width(&self) -> usize {
        self.lines().iter().map(|l| l.chars().count()).max().unwrap_or(0)
    }
    fn centered(&self) -> bool {
        false
    }
}

struct Banner;

const BANNER: &str = r#"
██╗   ██╗██╗ ██████╗ ██╗██╗     ██████╗  ██████╗ ██╗   ██╗████████╗███████╗
██║   ██║██║██╔════╝ ██║██║     ██╔══██╗██╔═══██╗██║   ██║╚══██╔══╝██╔════╝
██║   ██║██║██║  ███╗██║██║     ██████╔╝██║   ██║██║   ██║   ██║   █████╗
╚██╗ ██╔╝██║██║   ██║██║██║     ██╔══██╗██║   ██║██║   ██║   ██║   ██╔══╝
 ╚████╔╝ ██║╚██████╔╝██║███████╗██║  ██║╚██████╔╝╚██████╔╝   ██║   ███████╗
  ╚═══╝  ╚═╝ ╚═════╝ ╚═╝╚══════╝╚═╝  ╚═╝ ╚═════╝  ╚═════╝    ╚═╝   ╚══════╝
"#;

impl Field for Banner {
    fn lines(&self) -> Vec<String> {
        BANNER.split('\n').map(str::to_string).collect()
    }

    fn centered(&self) -> bool {
        true
    }
}

pub const NAME: &str = "VigilRoute";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

struct BuildInfo;

impl Field for BuildInfo {
    fn lines(&self) -> Vec<String> {
        vec![
            format!("{NAME} {VERSION}"),
            format!("Target: {}", std::env::consts::OS),
        ]
    }
}

struct Motd {
    message: &'static str,
    left_eye: char,
    right_eye: char,
    mouth: char,
}

const MOTDS: &[Motd] = &[
    Motd { message: "watching the access log...", left_eye: '.', right_eye: '.', mouth: 'w' },
    Motd { message: "nothing suspicious yet.", left_eye: 'o', right_eye: 'o', mouth: 'w' },
    Motd { message: "purring along...", left_eye: '-', right_eye: '-', mouth: 'w' },
];

impl Field for Motd {
    fn lines(&self) -> Vec<String> {
        let border: String = std::iter::repeat(SEPARATOR).take(self.message.chars().count()).collect();
        vec![
            format!("┌{border}┐"),
            format!("│{}│", self.message),
            format!("└{border}┘  {} {}  {}", self.left_eye, self.right_eye, self.mouth),
        ]
    }

    fn centered(&self) -> bool {
        true
    }
}

fn pick_motd() -> &'static Motd {
    MOTDS.choose(&mut rand::thread_rng()).unwrap_or(&MOTDS[0])
}

fn render(field: &dyn Field, width: usize) -> String {
    let mut out = String::new();
    for line in field.lines() {
        if field.centered() {
            let pad = width.saturating_sub(line.chars().count()) / 2;
            out.push_str(&" ".repeat(pad));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// The multi-line banner printed once at startup.
pub fn banner() -> String {
    let fields: Vec<Box<dyn Field>> = vec![Box::new(Banner), Box::new(BuildInfo), Box::new(pick_motd_boxed())];
    let width = fields.iter().map(|f| f.width()).max().unwrap_or(0);
    let separator: String = std::iter::repeat(SEPARATOR).take(width).collect();

    let mut out = String::new();
    out.push_str(&separator);
    out.push('\n');
    for field in &fields {
        out.push_str(&render(field.as_ref(), width));
        out.push_str(&separator);
        out.push('\n');
    }
    out
}

fn pick_motd_boxed() -> Motd {
    let m = pick_motd();
    Motd { message: m.message, left_eye: m.left_eye, right_eye: m.right_eye, mouth: m.mouth }
}

/// A single-line form: used for `--version` output and as the ACL writer's
/// metadata comment (must never contain a newline, per spec §6).
pub fn single_line() -> String {
    format!("{NAME} {VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_has_no_newline() {
        assert!(!single_line().contains('\n'));
        assert!(single_line().contains(NAME));
    }

    #[test]
    fn banner_is_non_empty() {
        assert!(!banner().is_empty());
    }
}
