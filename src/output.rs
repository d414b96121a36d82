use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize the record to JSON")]
    SerializeJson(#[source] serde_json::Error),
    #[error("CSV headers must be written before any records")]
    LateCsvHeaders,
    #[error("could not format a CSV field")]
    SerializeCsv,
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match &self.format {
            Format::Table => Formatter::Table { comfy: new_table(), headers: Vec::new(), rows: 0 },
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { written_records: false },
        };
        Ok(Output { args: self, io, formatter })
    }
}

fn new_table() -> comfy_table::Table {
    let mut comfy = comfy_table::Table::new();
    comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
    comfy
}

pub struct Output {
    args: Args,
    io: Box<dyn std::io::Write + Send>,
    formatter: Formatter,
}

enum Formatter {
    Csv { written_records: bool },
    Table { comfy: comfy_table::Table, headers: Vec<&'static str>, rows: usize },
    Jsonl,
}

impl Output {
    pub fn table_headers(&mut self, hdrs: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                if *written_records {
                    return Err(Error::LateCsvHeaders);
                }
                *written_records = true;
                self.write_csv_row(&hdrs)?;
            }
            Formatter::Table { comfy, headers, .. } => {
                comfy.set_header(hdrs.clone());
                *headers = hdrs;
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for value in values {
            let inp = value.as_bytes();
            let (WriteResult::InputEmpty, ib, ob) = writer.field(inp, &mut output) else {
                return Err(Error::SerializeCsv);
            };
            if ib != value.len() {
                return Err(Error::SerializeCsv);
            }
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
            let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                return Err(Error::SerializeCsv);
            };
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            return Err(Error::SerializeCsv);
        };
        self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))
    }

    pub fn result<R: serde::Serialize>(
        &mut self,
        table_row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                *written_records = true;
                let values = table_row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy, rows, .. } => {
                comfy.add_row(table_row());
                *rows += 1;
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &serde_record())
                    .map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    /// Write out everything collected so far, for output that goes on indefinitely.
    pub fn flush(&mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy, headers, rows } = &mut self.formatter {
            if *rows > 0 {
                let mut table = new_table();
                if !headers.is_empty() {
                    table.set_header(headers.clone());
                }
                let full = std::mem::replace(comfy, table);
                *rows = 0;
                writeln!(self.io, "{full}").map_err(|e| self.write_error(e))?;
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    pub fn commit(mut self) -> Result<(), Error> {
        self.flush()
    }
}
