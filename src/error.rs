pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Internal(String),
    BlankCollectionUrl(),
    InvalidUrl(String),
    InvalidSteamCmdPath(String),
    MissingFields(),
    NoWorkshopItems(),
    NotWorkshopLink(String),
    WorkerExitCode(i32),
    Curl(curl::Error),
    FsExtra(fs_extra::error::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Reqwest(reqwest::Error),
    TomlDe(toml::de::Error),
    TomlSer(toml::ser::Error),
    Url(url::ParseError),
    Zip(zip::result::ZipError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(msg) => write!(f, "{}", msg),
            Error::BlankCollectionUrl() => write!(f, "Please provide a mod collection link before loading"),
            Error::InvalidUrl(url) => write!(f, "Not a valid http(s) link: {}", url),
            Error::InvalidSteamCmdPath(path) => write!(f, "The provided path does not point to steamcmd: {}", path),
            Error::MissingFields() => write!(f, "Please fill in all the fields"),
            Error::NoWorkshopItems() => write!(f, "No mod IDs provided. Please add mod links first."),
            Error::NotWorkshopLink(link) => write!(f, "No workshop item ID found in '{}'", link),
            Error::WorkerExitCode(code) => write!(f, "steamcmd exited with code {}", code),
            Error::Url(e) => write!(f, "Not a valid link: {}", e),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<curl::Error> for Error {
    fn from(value: curl::Error) -> Self {
        Error::Curl(value)
    }
}

impl From<fs_extra::error::Error> for Error {
    fn from(value: fs_extra::error::Error) -> Self {
        Error::FsExtra(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(value)
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Reqwest(value)
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Error::TomlDe(value)
    }
}

impl From<toml::ser::Error> for Error {
    fn from(value: toml::ser::Error) -> Self {
        Error::TomlSer(value)
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Self {
        Error::Url(value)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(value: zip::result::ZipError) -> Self {
        Error::Zip(value)
    }
}
