//! Server definitions: how to launch a language server and which extensions it owns.
//!
//! A definition persists as a flat list of strings whose first element names the launch
//! kind, or as that same list encoded on a single CSV line:
//!
//! ```text
//! artifact,   <ext>, <group:artifact:version>, <main class>, <args...>
//! exe,        <ext>, <executable path>, <args...>
//! rawCommand, <ext>, <command tokens...>
//! ```
//!
//! A definition whose id is not the extension's default, or that carries initialization
//! options, is written with a `+` after the kind and two more elements after the extension:
//!
//! ```text
//! exe+, <ext>, <id>, <initialization options as JSON, or null>, <executable path>, <args...>
//! ```

use crate::connection::{ArtifactResolver, LaunchCommand};
use crate::error::{LspError, LspResult};
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Separator between several extensions sharing one definition (`"c;h"`).
pub const SPLIT_CHAR: char = ';';

const ARTIFACT: &str = "artifact";
const EXECUTABLE: &str = "exe";
const RAW_COMMAND: &str = "rawCommand";
/// Suffix of a kind tag followed by an id and initialization options.
const EXTENDED: char = '+';

/// How a server process is launched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Launch {
    /// A JVM artifact resolved to a classpath by an external resolver.
    Artifact {
        package: String,
        main_class: String,
        args: Vec<String>,
    },
    /// An executable path plus arguments.
    Executable { path: String, args: Vec<String> },
    /// A full command line, already split into tokens.
    RawCommand { command: Vec<String> },
}

impl Launch {
    /// The tag used as first element of the flat encoding.
    pub fn tag(&self) -> &'static str {
        match self {
            Launch::Artifact { .. } => ARTIFACT,
            Launch::Executable { .. } => EXECUTABLE,
            Launch::RawCommand { .. } => RAW_COMMAND,
        }
    }

    /// Program and arguments to spawn, before quote stripping.
    fn command_line(&self, resolver: Option<&dyn ArtifactResolver>) -> LspResult<Vec<String>> {
        match self {
            Launch::Artifact {
                package,
                main_class,
                args,
            } => {
                let resolver = resolver.ok_or_else(|| {
                    LspError::Launch(format!("No artifact resolver for {package}"))
                })?;
                let classpath = resolver.resolve_classpath(package)?;
                let mut line = vec![
                    "java".to_string(),
                    "-cp".to_string(),
                    classpath,
                    main_class.clone(),
                ];
                line.extend(args.iter().cloned());
                Ok(line)
            }
            Launch::Executable { path, args } => {
                let mut line = vec![path.clone()];
                line.extend(args.iter().cloned());
                Ok(line)
            }
            Launch::RawCommand { command } => Ok(command.clone()),
        }
    }
}

/// Describes one kind of language server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDefinition {
    /// Extension key, possibly several extensions joined by [`SPLIT_CHAR`].
    pub extension: String,
    /// Language id sent in `didOpen`.
    pub id: String,
    pub launch: Launch,
    /// Forwarded verbatim as `initializationOptions`.
    pub initialization_options: Option<Value>,
}

impl ServerDefinition {
    /// Create a definition; the id comes from the extension's well-known language id.
    pub fn new(extension: impl Into<String>, launch: Launch) -> Self {
        let extension = extension.into();
        Self {
            id: default_id(&extension),
            extension,
            launch,
            initialization_options: None,
        }
    }

    /// Executable definition.
    pub fn executable(
        extension: impl Into<String>,
        path: impl Into<String>,
        args: Vec<impl Into<String>>,
    ) -> Self {
        Self::new(
            extension,
            Launch::Executable {
                path: path.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Raw command definition.
    pub fn raw_command(extension: impl Into<String>, command: Vec<impl Into<String>>) -> Self {
        Self::new(
            extension,
            Launch::RawCommand {
                command: command.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Artifact definition.
    pub fn artifact(
        extension: impl Into<String>,
        package: impl Into<String>,
        main_class: impl Into<String>,
        args: Vec<impl Into<String>>,
    ) -> Self {
        Self::new(
            extension,
            Launch::Artifact {
                package: package.into(),
                main_class: main_class.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Override the language id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach initialization options.
    pub fn with_initialization_options(mut self, options: Value) -> Self {
        self.initialization_options = Some(options);
        self
    }

    /// Every key this definition is reachable under: each split part and the combined key.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self
            .extension
            .split(SPLIT_CHAR)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect();
        if !exts.iter().any(|e| *e == self.extension) {
            exts.push(self.extension.clone());
        }
        exts
    }

    /// Check if this definition handles a file extension.
    pub fn handles_extension(&self, ext: &str) -> bool {
        self.extension.split(SPLIT_CHAR).any(|e| e.trim() == ext) || self.extension == ext
    }

    /// Command to spawn in `working_dir`.
    ///
    /// Single quotes are stripped from every token: they only group words in the flat
    /// encoding.
    pub fn launch_command(
        &self,
        working_dir: &Path,
        resolver: Option<&dyn ArtifactResolver>,
    ) -> LspResult<LaunchCommand> {
        let mut line = self
            .launch
            .command_line(resolver)?
            .into_iter()
            .map(|s| s.replace('\'', ""));
        let program = line
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| LspError::bad_definition(format!("Empty command for {}", self.id)))?;
        Ok(LaunchCommand {
            program,
            args: line.collect(),
            working_dir: working_dir.to_path_buf(),
        })
    }

    /// Flat string-list encoding. Arguments are escaped so that parsing yields them back.
    pub fn to_array(&self) -> Vec<String> {
        let tag = self.launch.tag();
        let plain =
            self.id == default_id(&self.extension) && self.initialization_options.is_none();
        let mut arr = if plain {
            vec![tag.to_string(), self.extension.clone()]
        } else {
            let options = self
                .initialization_options
                .as_ref()
                .map_or_else(|| "null".to_string(), Value::to_string);
            vec![
                format!("{tag}{EXTENDED}"),
                self.extension.clone(),
                self.id.clone(),
                options,
            ]
        };
        match &self.launch {
            Launch::Artifact {
                package,
                main_class,
                args,
            } => {
                arr.push(package.clone());
                arr.push(main_class.clone());
                arr.extend(args.iter().map(|a| escape_arg(a)));
            }
            Launch::Executable { path, args } => {
                arr.push(path.clone());
                arr.extend(args.iter().map(|a| escape_arg(a)));
            }
            Launch::RawCommand { command } => arr.extend(command.iter().map(|a| escape_arg(a))),
        }
        arr
    }

    /// Parse the flat string-list encoding. Blank elements are ignored.
    pub fn from_array<S: AsRef<str>>(arr: &[S]) -> LspResult<Self> {
        let arr: Vec<&str> = arr
            .iter()
            .map(AsRef::as_ref)
            .filter(|s| !s.trim().is_empty())
            .collect();
        let Some((&tag, tail)) = arr.split_first() else {
            return Err(LspError::bad_definition("Empty definition"));
        };

        let too_short = || {
            warn!(definition = %arr.join(" ; "), "Not enough elements for a server definition");
            LspError::bad_definition(format!("Not enough elements: {}", arr.join(" ; ")))
        };

        let (kind, extended) = match tag.strip_suffix(EXTENDED) {
            Some(kind) => (kind, true),
            None => (tag, false),
        };
        let header = if extended { 3 } else { 1 };
        let required = match kind {
            ARTIFACT => 2,
            EXECUTABLE | RAW_COMMAND => 1,
            other => return Err(LspError::bad_definition(format!("Unknown type {other}"))),
        };
        if tail.len() < header + required {
            return Err(too_short());
        }
        let (head, rest) = tail.split_at(header);

        let launch = match kind {
            ARTIFACT => Launch::Artifact {
                package: rest[0].to_string(),
                main_class: rest[1].to_string(),
                args: parse_args(&rest[2..]),
            },
            EXECUTABLE => Launch::Executable {
                path: rest[0].to_string(),
                args: parse_args(&rest[1..]),
            },
            _ => Launch::RawCommand {
                command: parse_args(rest),
            },
        };
        let mut definition = Self::new(head[0], launch);
        if extended {
            definition.id = head[1].to_string();
            let options: Value = serde_json::from_str(head[2]).map_err(|e| {
                LspError::bad_definition(format!("Bad initialization options: {e}"))
            })?;
            definition.initialization_options = Some(options).filter(|o| !o.is_null());
        }
        Ok(definition)
    }

    /// Encode as one CSV line.
    pub fn to_csv(&self) -> String {
        csv::encode(&self.to_array())
    }

    /// Parse one CSV line.
    pub fn from_csv(line: &str) -> LspResult<Self> {
        Self::from_array(&csv::decode(line)?)
    }
}

/// Language id of the first extension in a key, or the extension itself.
fn default_id(extension: &str) -> String {
    let first = extension.split(SPLIT_CHAR).next().unwrap_or_default();
    language_id(first).unwrap_or(first).to_string()
}

/// Backslash-escape the characters [`parse_args`] treats specially.
fn escape_arg(arg: &str) -> String {
    arg.chars().fold(String::with_capacity(arg.len()), |mut out, ch| {
        if matches!(ch, ' ' | '\'' | '"' | '\\') {
            out.push('\\');
        }
        out.push(ch);
        out
    })
}

/// Split argument strings on spaces, keeping quoted runs together.
///
/// Quote characters stay in the tokens; a backslash is dropped and the character after
/// it taken literally. Empty tokens are dropped.
pub fn parse_args<S: AsRef<str>>(parts: &[S]) -> Vec<String> {
    let mut args = Vec::new();
    let mut single_quote = false;
    let mut double_quote = false;
    let mut escaped = false;
    let mut current = String::new();

    for part in parts {
        for ch in part.as_ref().chars() {
            if escaped {
                escaped = false;
                current.push(ch);
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '\'' if !double_quote => {
                    single_quote = !single_quote;
                    current.push(ch);
                }
                '"' if !single_quote => {
                    double_quote = !double_quote;
                    current.push(ch);
                }
                ' ' if !single_quote && !double_quote => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            }
        }
        if single_quote || double_quote || escaped {
            // The run continues into the next element.
            escaped = false;
            current.push(' ');
        } else if !current.is_empty() {
            args.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        args.push(current.trim_end().to_string());
    }
    args
}

/// Well-known language id for a file extension.
pub fn language_id(ext: &str) -> Option<&'static str> {
    let id = match ext {
        "abap" => "abap",
        "bat" => "bat",
        "bib" => "bibtex",
        "clj" => "clojure",
        "coffee" => "coffeescript",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" => "cpp",
        "cs" => "csharp",
        "css" => "css",
        "diff" => "diff",
        "dart" => "dart",
        "fs" => "fsharp",
        "go" => "go",
        "groovy" => "groovy",
        "handlebars" => "handlebars",
        "html" => "html",
        "ini" => "ini",
        "java" => "java",
        "js" => "javascript",
        "jsx" => "javascriptreact",
        "json" => "json",
        "tex" => "latex",
        "less" => "less",
        "lua" => "lua",
        "md" => "markdown",
        "m" => "objective-c",
        "mm" => "objective-cpp",
        "pl" | "pm" => "perl",
        "p6" | "pm6" => "perl6",
        "php" => "php",
        "ps1" => "powershell",
        "pug" => "jade",
        "py" => "python",
        "r" => "r",
        "cshtml" => "razor",
        "rb" => "ruby",
        "rs" => "rust",
        "scss" => "scss",
        "sass" => "sass",
        "scala" => "scala",
        "sh" | "bash" | "zsh" | "csh" => "shellscript",
        "sql" => "sql",
        "swift" => "swift",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "kt" | "kts" => "kotlin",
        "vb" => "vb",
        "xml" => "xml",
        "xsl" => "xsl",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        _ => return None,
    };
    Some(id)
}

/// Single-record CSV codec (RFC 4180 quoting).
mod csv {
    use crate::error::{LspError, LspResult};

    pub fn encode(fields: &[String]) -> String {
        fields
            .iter()
            .map(|f| {
                if f.contains(&[',', '"', '\n', '\r'][..]) {
                    format!("\"{}\"", f.replace('"', "\"\""))
                } else {
                    f.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn decode(line: &str) -> LspResult<Vec<String>> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut chars = line.trim_end_matches(&['\r', '\n'][..]).chars().peekable();

        while let Some(ch) = chars.next() {
            match (ch, quoted) {
                ('"', true) if chars.peek() == Some(&'"') => {
                    chars.next();
                    current.push('"');
                }
                ('"', true) => quoted = false,
                ('"', false) if current.is_empty() => quoted = true,
                (',', false) => fields.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        if quoted {
            return Err(LspError::bad_definition("Unterminated quote in CSV line"));
        }
        fields.push(current);
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct FixedClasspath;

    impl ArtifactResolver for FixedClasspath {
        fn resolve_classpath(&self, package: &str) -> LspResult<String> {
            Ok(format!("/cache/{}.jar", package.replace(':', "_")))
        }
    }

    #[test]
    fn test_executable_array_roundtrip() {
        let def = ServerDefinition::executable("rs", "rust-analyzer", vec!["--log", "x"]);
        assert_eq!(def.id, "rust");
        let arr = def.to_array();
        assert_eq!(arr, vec!["exe", "rs", "rust-analyzer", "--log", "x"]);
        assert_eq!(ServerDefinition::from_array(&arr).unwrap(), def);
    }

    #[test]
    fn test_artifact_from_array() {
        let arr = ["artifact", "scala", "ch.epfl:dotty:0.1", "dotty.Main", "-stdio"];
        let def = ServerDefinition::from_array(&arr).unwrap();
        assert_eq!(
            def.launch,
            Launch::Artifact {
                package: "ch.epfl:dotty:0.1".to_string(),
                main_class: "dotty.Main".to_string(),
                args: vec!["-stdio".to_string()],
            }
        );
        assert_eq!(def.to_array(), arr);
    }

    #[test]
    fn test_raw_command_parses_quoted_args() {
        let arr = ["rawCommand", "foo", "server --name 'my server' -v"];
        let def = ServerDefinition::from_array(&arr).unwrap();
        assert_eq!(
            def.launch,
            Launch::RawCommand {
                command: vec![
                    "server".to_string(),
                    "--name".to_string(),
                    "'my server'".to_string(),
                    "-v".to_string(),
                ]
            }
        );
        assert_eq!(def.id, "foo");

        let cmd = def.launch_command(Path::new("/proj"), None).unwrap();
        assert_eq!(cmd.program, "server");
        assert_eq!(cmd.args, vec!["--name", "my server", "-v"]);
        assert_eq!(cmd.working_dir, PathBuf::from("/proj"));
    }

    #[test]
    fn test_from_array_rejects_short_or_unknown() {
        assert!(ServerDefinition::from_array(&["exe", "rs"]).is_err());
        assert!(ServerDefinition::from_array(&["artifact", "scala", "pkg"]).is_err());
        assert!(ServerDefinition::from_array(&["rawCommand", "foo"]).is_err());
        assert!(ServerDefinition::from_array(&["socket", "foo", "bar"]).is_err());
        let empty: [&str; 0] = [];
        assert!(matches!(
            ServerDefinition::from_array(&empty),
            Err(LspError::BadDefinition(_))
        ));
    }

    #[test]
    fn test_from_array_filters_blank_elements() {
        let def = ServerDefinition::from_array(&["exe", " ", "py", "", "pyls"]).unwrap();
        assert_eq!(def.extension, "py");
        assert_eq!(def.id, "python");
    }

    #[test]
    fn test_csv_roundtrip_with_special_characters() {
        let def = ServerDefinition::executable("c;h", "clangd", vec!["--query-driver=a,b", "\"x\""]);
        let line = def.to_csv();
        assert_eq!(
            line,
            r#"exe,c;h,clangd,"--query-driver=a,b","\""x\""""#
        );
        assert_eq!(ServerDefinition::from_csv(&line).unwrap(), def);
        assert!(ServerDefinition::from_csv("exe,\"rs,cmd").is_err());
    }

    #[test]
    fn test_extensions_split() {
        let def = ServerDefinition::executable("c;h", "clangd", Vec::<String>::new());
        assert_eq!(def.extensions(), vec!["c", "h", "c;h"]);
        assert!(def.handles_extension("h"));
        assert!(def.handles_extension("c;h"));
        assert!(!def.handles_extension("cpp"));
        assert_eq!(def.id, "c");
    }

    #[test]
    fn test_artifact_launch_command() {
        let def = ServerDefinition::artifact("scala", "org:srv:1", "srv.Main", vec!["-x"]);
        let cmd = def
            .launch_command(Path::new("/w"), Some(&FixedClasspath))
            .unwrap();
        assert_eq!(cmd.program, "java");
        assert_eq!(cmd.args, vec!["-cp", "/cache/org_srv_1.jar", "srv.Main", "-x"]);
        assert!(def.launch_command(Path::new("/w"), None).is_err());
    }

    #[test]
    fn test_parse_args_escapes() {
        let args = parse_args(&[r#"a\ b "c d" e"#]);
        assert_eq!(args, vec!["a b", "\"c d\"", "e"]);
        let args = parse_args(&[r"x\\y", r"it\'s"]);
        assert_eq!(args, vec![r"x\y", "it's"]);
        let args = parse_args(&["x  y", "z"]);
        assert_eq!(args, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_array_keeps_id_options_and_spaced_args() {
        let definitions = [
            ServerDefinition::executable("rs", "ra", vec!["my arg", "it's", r"C:\tmp", "\"q\""])
                .with_id("custom")
                .with_initialization_options(serde_json::json!({"a": 1, "b": [true, null]})),
            ServerDefinition::raw_command("py", vec!["pyls", "--log file"]).with_id("pyls"),
            ServerDefinition::artifact("scala", "org:srv:1", "srv.Main", vec!["-x y"])
                .with_initialization_options(serde_json::json!("opt")),
        ];
        for def in definitions {
            let arr = def.to_array();
            assert!(arr[0].ends_with('+'));
            assert_eq!(ServerDefinition::from_array(&arr).unwrap(), def);
            assert_eq!(ServerDefinition::from_csv(&def.to_csv()).unwrap(), def);
        }
    }

    #[test]
    fn test_extended_array_layout() {
        let def = ServerDefinition::executable("ts", "tsserver", vec!["--stdio"])
            .with_id("typescript-ls")
            .with_initialization_options(serde_json::json!({"x": 1}));
        assert_eq!(
            def.to_array(),
            vec!["exe+", "ts", "typescript-ls", r#"{"x":1}"#, "tsserver", "--stdio"]
        );

        let parsed = ServerDefinition::from_array(&["exe+", "rs", "ra-nightly", "null", "ra"]).unwrap();
        assert_eq!(parsed.id, "ra-nightly");
        assert_eq!(parsed.initialization_options, None);

        assert!(ServerDefinition::from_array(&["exe+", "rs", "id", "null"]).is_err());
        assert!(ServerDefinition::from_array(&["exe+", "rs", "id", "{bad", "ra"]).is_err());
    }

    #[test]
    fn test_language_id() {
        assert_eq!(language_id("rs"), Some("rust"));
        assert_eq!(language_id("tsx"), Some("typescriptreact"));
        assert_eq!(language_id("unknown"), None);
    }
}
