extern crate basalt_ir;
extern crate basalt_opt;
extern crate clap;
extern crate env_logger;

use std::fs::File;
use std::io::prelude::*;

use clap::Parser;

use basalt_opt::pass::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    bir_file: String,

    #[arg(short, long, default_value_t = String::new())]
    output: String,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if !args.bir_file.ends_with(".bir") {
        eprintln!("WARNING: Running basalt_dse on a file without a .bir extension - interpreting as a textual Basalt IR file.");
    }

    let mut file = File::open(args.bir_file).expect("PANIC: Unable to open input file.");
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .expect("PANIC: Unable to read input file contents.");
    let module =
        basalt_ir::parse::parse(&contents).expect("PANIC: Failed to parse Basalt IR file.");

    let mut pm = PassManager::new(module);
    pm.add_pass(Pass::Verify);
    pm.add_pass(Pass::Dse);
    pm.add_pass(Pass::Verify);
    let reports = pm
        .run_passes()
        .expect("PANIC: Failed to run passes on Basalt IR module.");
    for (name, report) in reports.iter() {
        eprintln!(
            "{}: eliminated {} dead stores, {} candidates rejected",
            name,
            report.eliminated,
            report.rejections.len()
        );
    }

    let module = pm.into_module();
    let mut printed = String::new();
    basalt_ir::ir::write_module(&module, &mut printed)
        .expect("PANIC: Unable to generate output file contents.");
    if args.output.is_empty() {
        print!("{}", printed);
    } else {
        let mut file = File::create(args.output).expect("PANIC: Unable to open output file.");
        file.write_all(printed.as_bytes())
            .expect("PANIC: Unable to write output file contents.");
    }
}
