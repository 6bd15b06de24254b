use crate::domain::CertificateKind;

/// A certificate as handed over by the file parsing collaborator.
#[derive(Debug, Clone)]
pub struct CertificateData {
    pub der: Vec<u8>,
    /// Kind declared by the source, e.g. non-conformant DSCs from the nc-data branch
    pub declared_kind: Option<CertificateKind>,
    /// `false` when the parser already found the record unusable
    pub parse_valid: bool,
}

impl CertificateData {
    pub fn new(der: Vec<u8>) -> Self {
        Self {
            der,
            declared_kind: None,
            parse_valid: true,
        }
    }

    pub fn with_kind(mut self, kind: CertificateKind) -> Self {
        self.declared_kind = Some(kind);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CrlData {
    pub der: Vec<u8>,
    pub parse_valid: bool,
}

impl CrlData {
    pub fn new(der: Vec<u8>) -> Self {
        Self {
            der,
            parse_valid: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MasterListData {
    pub cms: Vec<u8>,
    pub parse_valid: bool,
}

impl MasterListData {
    pub fn new(cms: Vec<u8>) -> Self {
        Self {
            cms,
            parse_valid: true,
        }
    }
}

/// One item of the incoming record stream.
#[derive(Debug, Clone)]
pub enum IngestRecord {
    Certificate(CertificateData),
    Crl(CrlData),
    MasterList(MasterListData),
}

impl IngestRecord {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Certificate(_) => "certificate",
            Self::Crl(_) => "CRL",
            Self::MasterList(_) => "master list",
        }
    }

    pub fn parse_valid(&self) -> bool {
        match self {
            Self::Certificate(data) => data.parse_valid,
            Self::Crl(data) => data.parse_valid,
            Self::MasterList(data) => data.parse_valid,
        }
    }
}
