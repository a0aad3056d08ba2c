pub mod grade;
pub mod loaders;
pub mod result;
pub mod student;
pub mod subject;

pub use grade::{round2, ClassGrade, LetterGrade, SemesterSummary};
pub use loaders::{load_all_toml_files, load_reference_data, ReferenceData};
pub use result::{ElectiveChoice, FetchKind, Marks, ParsedPage, ParsedRow, ResultRecord};
pub use student::{is_lateral_entry, Student};
pub use subject::{default_mappings, infer_scheme, max_marks_for, ElectiveMapping, ElectiveTable, Subject};
