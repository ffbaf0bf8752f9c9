//! Remote shell text construction. Every value that ends up inside a remote
//! command goes through [`quote`]; shell syntax itself (`&&`, redirections,
//! `$(hostname)` expansions that must happen on the remote host) is written
//! only by the builders here.

/// exit status a launch reserves for losing the marker claim race
pub const CLAIM_LOST: i32 = 9;

/// quote one word for a POSIX shell; words from a safe charset pass through
pub fn quote(word: &str) -> String {
    if !word.is_empty() && word.bytes().all(is_safe_byte) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"@%_+=:,./-".contains(&b)
}

/// render a command line with the program and every argument quoted
pub fn exec(program: &str, args: &[String]) -> String {
    let mut words = Vec::with_capacity(args.len() + 1);
    words.push(quote(program));
    words.extend(args.iter().map(|arg| quote(arg)));
    words.join(" ")
}

/// chains remote script stages
pub struct Script {
    text: String,
}

impl Script {
    pub fn start(stage: impl Into<String>) -> Self {
        Self { text: stage.into() }
    }

    /// run the next stage only if the previous one succeeded
    pub fn and(mut self, stage: impl AsRef<str>) -> Self {
        self.text.push_str(" && ");
        self.text.push_str(stage.as_ref());
        self
    }

    pub fn render(self) -> String {
        self.text
    }
}

/// Wrap a command line so it survives the ssh session: the process is
/// backgrounded with its output redirected, and its pid is recorded in the
/// marker file. The marker is claimed atomically (noclobber) before the
/// spawn; a lost race exits with [`CLAIM_LOST`] and nothing is spawned.
///
/// `marker` and the log names may contain `$(…)` expansions that the remote
/// host resolves itself, so they are interpolated verbatim.
pub fn detached(cmdline: &str, stdout_log: &str, stderr_log: &str, marker: &str) -> String {
    let body = format!(
        "set -C; {{ : > {marker}; }} 2> /dev/null || exit {lost}; set +C; \
         {cmd} > {out} 2> {err} & echo $! > {marker}",
        marker = marker,
        lost = CLAIM_LOST,
        cmd = cmdline,
        out = stdout_log,
        err = stderr_log,
    );
    format!("bash --login -c {}", quote(&body))
}

#[cfg(test)]
mod test {
    use super::{detached, exec, quote, Script};

    #[test]
    fn test_quote_passes_safe_words() {
        assert_eq!("./Master", quote("./Master"));
        assert_eq!("--master_port=14925", quote("--master_port=14925"));
    }

    #[test]
    fn test_quote_wraps_specials() {
        assert_eq!("'a b'", quote("a b"));
        assert_eq!("''", quote(""));
        assert_eq!(r"'it'\''s'", quote("it's"));
        assert_eq!("'a;rm -rf /'", quote("a;rm -rf /"));
    }

    #[test]
    fn test_exec_quotes_every_argument() {
        let line = exec(
            "./Worker",
            &["--a=1".to_string(), "--msg=two words".to_string()],
        );
        assert_eq!("./Worker --a=1 '--msg=two words'", line);
    }

    #[test]
    fn test_script_chains_with_and() {
        let text = Script::start("cd /tmp")
            .and("cat Master.pid 2> /dev/null")
            .render();
        assert_eq!("cd /tmp && cat Master.pid 2> /dev/null", text);
    }

    #[test]
    fn test_detached_claims_before_spawn() {
        let script = detached("./Master --a=1", "stdout", "stderr", "Master.pid");
        assert!(script.starts_with("bash --login -c "));
        assert!(script.contains("set -C"));
        assert!(script.contains("|| exit 9"));
        // noclobber is lifted again before the log redirections
        assert!(script.contains("set +C"));
        assert!(script.contains("./Master --a=1 > stdout 2> stderr &"));
        assert!(script.contains("echo $! > Master.pid"));
        // the claim happens before the spawn
        let claim = script.find(": > Master.pid").unwrap();
        let spawn = script.find("./Master").unwrap();
        assert!(claim < spawn);
    }

    #[test]
    fn test_detached_keeps_remote_expansions() {
        let script = detached(
            "./Worker",
            "stdout.$(hostname)",
            "stderr.$(hostname)",
            "Worker.$(hostname).pid",
        );
        assert!(script.contains("echo $! > Worker.$(hostname).pid"));
        assert!(script.contains("> stdout.$(hostname) 2> stderr.$(hostname)"));
    }
}
