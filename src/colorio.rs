// Copyright 2018 Peter Williams <peter@newton.cx>
// Licensed under the MIT License.

/*! Colorized CLI output.

There are a few common colorized output styles that we use. The report
itself is not written straight to the terminal: it is collected in a buffer,
so that nothing at all is emitted if the query fails partway, and so that
the same rendering code can target a file.

*/

use failure::Error;
use std::fmt;
use std::io::Write;
use termcolor::{Buffer, Color, ColorChoice, ColorSpec, StandardStream, WriteColor};


/// How to style some text to print.
///
/// Instead of using this type directly, use the `cprint!` family of macros.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Style {
    /// Style some text with a green color.
    Green,

    /// Style some text with a bold, bright color.
    Highlight,

    /// Style some text in the standard plain way.
    Plain,

    /// Style some text with a red color.
    Red,

    /// Style some text with a yellow color.
    Yellow,
}


/// Where to print some text.
///
/// Instead of using this type directly, use the `cprint!` family of macros.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stream {
    /// Add to the report buffer.
    Report,

    /// Print to standard error.
    Stderr,
}


macro_rules! cprint {
    ($cio:expr, green, $($fmt_args:expr),*) => {{
        use $crate::colorio::{Stream, Style};
        $cio.print_core(Stream::Report, Style::Green, format_args!($($fmt_args),*))
    }};

    ($cio:expr, hl, $($fmt_args:expr),*) => {{
        use $crate::colorio::{Stream, Style};
        $cio.print_core(Stream::Report, Style::Highlight, format_args!($($fmt_args),*))
    }};

    ($cio:expr, pl, $($fmt_args:expr),*) => {{
        use $crate::colorio::{Stream, Style};
        $cio.print_core(Stream::Report, Style::Plain, format_args!($($fmt_args),*))
    }};

    ($cio:expr, red, $($fmt_args:expr),*) => {{
        use $crate::colorio::{Stream, Style};
        $cio.print_core(Stream::Report, Style::Red, format_args!($($fmt_args),*))
    }};

    ($cio:expr, yellow, $($fmt_args:expr),*) => {{
        use $crate::colorio::{Stream, Style};
        $cio.print_core(Stream::Report, Style::Yellow, format_args!($($fmt_args),*))
    }};
}

macro_rules! cprintln {
    ($cio:expr, $style:ident, $($fmt_args:expr),*) => {
        cprint!($cio, $style, $($fmt_args),*);
        cprint!($cio, pl, "\n");
    };
}

macro_rules! ecprint {
    ($cio:expr, pl, $($fmt_args:expr),*) => {{
        use $crate::colorio::{Stream, Style};
        $cio.print_core(Stream::Stderr, Style::Plain, format_args!($($fmt_args),*))
    }};

    ($cio:expr, red, $($fmt_args:expr),*) => {{
        use $crate::colorio::{Stream, Style};
        $cio.print_core(Stream::Stderr, Style::Red, format_args!($($fmt_args),*))
    }};
}

macro_rules! ecprintln {
    ($cio:expr, $style:ident, $($fmt_args:expr),*) => {
        ecprint!($cio, $style, $($fmt_args),*);
        ecprint!($cio, pl, "\n");
    };
}


/// State needed for our colorized I/O.
pub struct ColorIo {
    report: Buffer,
    stderr: StandardStream,
    red: ColorSpec,
    green: ColorSpec,
    highlight: ColorSpec,
    yellow: ColorSpec,
}


impl ColorIo {
    /// Set up I/O, collecting the report into `report`. Whether the report
    /// comes out colorized depends on how that buffer was made.
    pub fn new(report: Buffer) -> Self {
        let stderr = StandardStream::stderr(ColorChoice::Auto);

        let mut green = ColorSpec::new();
        green.set_fg(Some(Color::Green)).set_bold(true);

        let mut highlight = ColorSpec::new();
        highlight.set_bold(true);

        let mut red = ColorSpec::new();
        red.set_fg(Some(Color::Red)).set_bold(true);

        let mut yellow = ColorSpec::new();
        yellow.set_fg(Some(Color::Yellow)).set_bold(true);

        ColorIo { report, stderr, green, highlight, red, yellow }
    }

    pub fn print_error(&mut self, err: Error) {
        let mut first = true;

        for cause in err.iter_chain() {
            if first {
                ecprint!(self, red, "error:");
                ecprintln!(self, pl, " {}", cause);
                first = false;
            } else {
                ecprint!(self, pl, "  ");
                ecprint!(self, red, "caused by:");
                ecprintln!(self, pl, " {}", cause);
            }
        }
    }

    /// Get at the report buffer, for unstyled output like CSV.
    pub fn report_writer(&mut self) -> &mut Buffer {
        &mut self.report
    }

    /// The report collected so far.
    pub fn report(&self) -> &Buffer {
        &self.report
    }

    /// Print formatted arguments to one of our output streams.
    ///
    /// Use the `cprint!` macros instead of this function.
    #[inline(always)]
    pub fn print_core(&mut self, stream: Stream, style: Style, args: fmt::Arguments) {
        let stream: &mut dyn WriteColor = match stream {
            Stream::Report => &mut self.report,
            Stream::Stderr => &mut self.stderr,
        };

        match style {
            Style::Green => {
                let _r = stream.set_color(&self.green);
            },

            Style::Highlight => {
                let _r = stream.set_color(&self.highlight);
            },

            Style::Plain => {
            },

            Style::Red => {
                let _r = stream.set_color(&self.red);
            },

            Style::Yellow => {
                let _r = stream.set_color(&self.yellow);
            },
        }

        let _r = write!(stream, "{}", args);

        match style {
            Style::Green | Style::Highlight | Style::Red | Style::Yellow => {
                let _r = stream.reset();
            },

            Style::Plain => {
            },
        }
    }
}
