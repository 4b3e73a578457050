#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProgressPhase {
    Extraction,
    Fixup,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressMessage {
    Started {
        phase: ProgressPhase,
        total: usize,
    },
    Progress {
        phase: ProgressPhase,
        current: usize,
        item: Option<String>,
    },
    Finished {
        phase: ProgressPhase,
    },
    Error(String),
    Exit,
}
