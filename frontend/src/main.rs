#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use std::collections::HashMap;

use symbuf::buffer::{declare_buffer, Buffer};
use symbuf::dtype::DataType;
use symbuf::expr::Expr;
use symbuf::pprint::{pprint, BufferPrintStyle};
use symbuf::var::Var;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Comma-separated dimension sizes. Identifiers become symbolic sizes.
    #[arg(long, value_delimiter = ',', required = true)]
    shape: Vec<String>,

    /// Element type, e.g. float32 or int8x16
    #[arg(long, default_value_t = DataType::float32())]
    dtype: DataType,

    #[arg(long, default_value = "buffer")]
    name: String,

    /// Print the load of the value at this index
    #[arg(long, value_delimiter = ',')]
    index: Option<Vec<String>>,

    /// First index of a slice to print
    #[arg(long, value_delimiter = ',', requires = "extents")]
    begins: Option<Vec<String>>,

    /// Sizes of a slice to print
    #[arg(long, value_delimiter = ',', requires = "begins")]
    extents: Option<Vec<String>>,

    /// Also print the buffer with explicit strides
    #[arg(long, default_value_t = false)]
    strided: bool,

    /// Table style
    #[arg(long, value_enum, default_value_t = BufferPrintStyle::Full)]
    style: BufferPrintStyle,
}

/// Interns symbolic sizes and indices by name, so each name denotes one [Var].
#[derive(Default)]
struct SymbolEnv(HashMap<String, Var>);

impl SymbolEnv {
    fn expr(&mut self, token: &str) -> Result<Expr> {
        let token = token.trim();
        if let Ok(v) = token.parse::<i64>() {
            return Ok(Expr::constant(v));
        }
        let mut chars = token.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            bail!("Expected an integer or identifier, but got {token:?}");
        }
        let var = self
            .0
            .entry(token.to_owned())
            .or_insert_with(|| Var::index(token));
        Ok(var.to_expr())
    }

    fn exprs(&mut self, tokens: &[String]) -> Result<Vec<Expr>> {
        tokens.iter().map(|t| self.expr(t)).collect()
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut env = SymbolEnv::default();

    let buffer = declare_buffer(env.exprs(&args.shape)?, args.dtype, &args.name);
    info!("Declared {buffer}");

    let mut table = vec![buffer.clone()];
    if args.strided {
        table.push(buffer.with_explicit_strides()?);
    }
    let slice = match (&args.begins, &args.extents) {
        (Some(begins), Some(extents)) => {
            let sliced = buffer.slice(&env.exprs(begins)?, &env.exprs(extents)?)?;
            table.push(sliced.clone());
            Some(sliced)
        }
        _ => None,
    };
    pprint(&table, args.style);

    if let Some(index) = &args.index {
        let index = env.exprs(index)?;
        print_load("buffer", &buffer, &index)?;
        if let Some(sliced) = &slice {
            print_load("slice", sliced, &index)?;
        }
    }
    Ok(())
}

fn print_load(label: &str, buffer: &Buffer, index: &[Expr]) -> Result<()> {
    let load = buffer.make_load(index)?;
    println!("{label}: {load}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_repeated_names_share_a_var() {
        let mut env = SymbolEnv::default();
        let shape = env.exprs(&["n".to_owned(), "4".to_owned()]).unwrap();
        let index = env.exprs(&["n".to_owned(), "0".to_owned()]).unwrap();
        assert_eq!(shape[0], index[0]);
        assert_eq!(shape[1], Expr::constant(4));
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        let mut env = SymbolEnv::default();
        assert!(env.expr("3n").is_err());
        assert!(env.expr("").is_err());
        assert!(env.expr("n-1").is_err());
    }

    #[test]
    fn test_parses_slice_args() {
        let args = Args::try_parse_from([
            "symbuf", "--shape", "R,8", "--begins", "1,0", "--extents", "2,8", "--dtype",
            "int8x4",
        ])
        .unwrap();
        assert_eq!(args.shape, ["R", "8"]);
        assert_eq!(args.dtype, "int8x4".parse().unwrap());
        assert!(Args::try_parse_from(["symbuf", "--shape", "4", "--begins", "0"]).is_err());
    }
}
