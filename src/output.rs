use serde::Serialize;

use crate::cli::OutputMode;

/// Prints a labeled result set as an aligned table, a JSON document, or
/// nothing at all.
pub fn print_results<T: Serialize>(
    mode: OutputMode,
    headers: &[&str],
    rows: Vec<Vec<String>>,
    json_value: &T,
) {
    match mode {
        OutputMode::Off => {}
        OutputMode::Json => match serde_json::to_string_pretty(json_value) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("cannot render json: {err}"),
        },
        OutputMode::Table => print_table(headers, rows),
    }
}

fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let nb_columns = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|header| header.len()).collect();
    for row in &rows {
        for (column, cell) in row.iter().enumerate().take(nb_columns) {
            widths[column] = widths[column].max(cell.len());
        }
    }
    let separator: String = widths
        .iter()
        .map(|width| format!("+{}", "-".repeat(width + 2)))
        .chain(std::iter::once("+".into()))
        .collect();
    let print_row = |cells: &[String]| {
        let line: String = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("| {cell:<width$} "))
            .chain(std::iter::once("|".into()))
            .collect();
        println!("{line}");
    };
    println!("{separator}");
    print_row(&headers.iter().map(|header| header.to_string()).collect::<Vec<_>>());
    println!("{separator}");
    for row in &rows {
        print_row(row);
    }
    println!("{separator}");
}
