use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    GccC,
    GccCxx,
    JdkJava,
    CpythonPython3,
    MonoCsharp,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::GccC,
        Language::GccCxx,
        Language::JdkJava,
        Language::CpythonPython3,
        Language::MonoCsharp,
    ];

    /// Guesses the language of a source file from its extension.
    ///
    /// Only the last path segment of `uri` is inspected, so both plain paths
    /// and store URIs (`scheme://tasks/a/b/sol.cpp`) are accepted.
    pub fn from_extension(uri: &str) -> Option<Self> {
        let file_name = uri.rsplit('/').next()?;
        let ext = Path::new(file_name).extension()?.to_str()?;
        match ext {
            "c" | "C" => Some(Language::GccC),
            "cc" | "cpp" | "cxx" | "c++" => Some(Language::GccCxx),
            "java" => Some(Language::JdkJava),
            "py" | "py3" => Some(Language::CpythonPython3),
            "cs" => Some(Language::MonoCsharp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::GccC => "GCC_C",
            Language::GccCxx => "GCC_CXX",
            Language::JdkJava => "JDK_JAVA",
            Language::CpythonPython3 => "CPYTHON_PYTHON3",
            Language::MonoCsharp => "MONO_CSHARP",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
