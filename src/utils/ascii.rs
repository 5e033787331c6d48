pub fn print_startup_banner() {
    let year = chrono::Local::now().format("%Y").to_string();

    // ANSI color codes
    let cyan = "\x1B[38;5;45m";
    let gray = "\x1B[38;5;245m";
    let bright_cyan = "\x1B[96m";
    let reset = "\x1B[0m";

    println!(
        r#"
  {year} Turnstile
   {cyan}
      .-------------.
      |  _________  |     {gray}one at a time,{cyan}
      | |         | |     {gray}members only{cyan}
      | |   ===   | |
      | |_________| |
      |      |      |
     =====---+---=====
      |      |      |
      |      |      |
      '------'------'
         {bright_cyan}turnstile v1.2{reset}
"#,
        year = year,
        cyan = cyan,
        gray = gray,
        bright_cyan = bright_cyan,
        reset = reset
    );
}
