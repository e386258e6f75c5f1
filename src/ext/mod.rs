mod one_line;

pub use one_line::one_line;
