//! Console line cleanup: drops CSI escape sequences and `§` format codes.

const ESC: char = '\x1b';
const FORMAT_MARKER: char = '§';

fn is_format_code(c: char) -> bool {
    c.is_ascii_hexdigit() || matches!(c.to_ascii_lowercase(), 'k' | 'l' | 'm' | 'n' | 'o' | 'r')
}

/// Progress of a possible CSI sequence, carrying the index of its `ESC`.
#[derive(Debug, Clone, Copy)]
enum Csi {
    Esc(usize),
    Params(usize),
    Intermediates(usize),
}

enum Step {
    Pending(Option<Csi>),
    Complete(usize),
}

fn advance(state: Option<Csi>, c: char) -> Step {
    let params = ('\x30'..='\x3f').contains(&c);
    let intermediate = ('\x20'..='\x2f').contains(&c);
    let fin = ('\x40'..='\x7e').contains(&c);
    match state {
        Some(Csi::Esc(start)) if c == '[' => Step::Pending(Some(Csi::Params(start))),
        Some(Csi::Params(start)) if params => Step::Pending(Some(Csi::Params(start))),
        Some(Csi::Params(start) | Csi::Intermediates(start)) if intermediate => {
            Step::Pending(Some(Csi::Intermediates(start)))
        }
        Some(Csi::Params(start) | Csi::Intermediates(start)) if fin => Step::Complete(start),
        _ => Step::Pending(None),
    }
}

/// Removes terminal escape sequences and `§x` color/format codes.
///
/// Single pass over a stack of kept chars: a sequence can only complete at the
/// top, and popping it may expose a neighbour that completes with the next
/// char (`"§§aa"`, `"\x1b§a[0m"`). Each kept char remembers the CSI state in
/// effect after it, so popping restores the state for free. The result holds
/// no removable sequence, which makes the function idempotent.
pub fn sanitize(line: &str) -> String {
    let mut kept: Vec<(char, Option<Csi>)> = Vec::with_capacity(line.len());
    for c in line.chars() {
        if is_format_code(c) && kept.last().is_some_and(|(p, _)| *p == FORMAT_MARKER) {
            kept.pop();
            continue;
        }
        if c == ESC {
            kept.push((c, Some(Csi::Esc(kept.len()))));
            continue;
        }
        let state = kept.last().and_then(|(_, s)| *s);
        match advance(state, c) {
            Step::Complete(start) => kept.truncate(start),
            Step::Pending(next) => kept.push((c, next)),
        }
    }
    kept.into_iter().map(|(c, _)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::sanitize;

    #[test]
    fn strips_color_escapes() {
        assert_eq!(sanitize("\x1b[32mHello\x1b[0m"), "Hello");
    }

    #[test]
    fn strips_format_codes() {
        assert_eq!(sanitize("§aGreen§r text"), "Green text");
        assert_eq!(sanitize("§LBold §KMagic"), "Bold Magic");
    }

    #[test]
    fn strips_escapes_with_intermediate_bytes() {
        assert_eq!(sanitize("a\x1b[1;31 qb"), "ab");
        assert_eq!(sanitize("\x1b[2K\x1b[1G> "), "> ");
    }

    #[test]
    fn keeps_incomplete_sequences() {
        assert_eq!(sanitize("\x1b[12"), "\x1b[12");
        assert_eq!(sanitize("trailing §"), "trailing §");
        assert_eq!(sanitize("§z is not a code"), "§z is not a code");
        assert_eq!(sanitize("\x1b]0;title"), "\x1b]0;title");
    }

    #[test]
    fn plain_text_is_untouched() {
        let line = "[12:00:01 INFO]: Done (3.2s)! For help, type \"help\"";
        assert_eq!(sanitize(line), line);
    }

    #[test]
    fn spliced_sequences_are_removed() {
        assert_eq!(sanitize("§§aa"), "");
        assert_eq!(sanitize("\x1b§a[0mok"), "ok");
        assert_eq!(sanitize("§\x1b[0ma"), "");
    }

    #[test]
    fn deeply_nested_codes_collapse_in_one_pass() {
        let n = 20_000;
        let line = format!("{}{}", "§".repeat(n), "a".repeat(n));
        assert_eq!(sanitize(&line), "");

        let csi = format!("{}{}", "\x1b[".repeat(n), "0m".repeat(n));
        assert_eq!(sanitize(&csi), "");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "",
            "plain",
            "\x1b[32mHello\x1b[0m",
            "§aGreen§r text",
            "§§§aaa",
            "\x1b\x1b[[0m0m",
            "\x1b§a[0m§\x1b[1mb",
            "§\u{00a7}ff mixed \x1b[38;5;208mcolor",
            "ünïcödé §9blue\x1b[0m",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "input: {s:?}");
        }
    }
}
